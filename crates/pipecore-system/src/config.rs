use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default data pipe capacity: 1 MiB.
pub const DEFAULT_DATA_PIPE_CAPACITY_BYTES: usize = 1024 * 1024;

/// Limits applied by a [`Core`](crate::Core).
///
/// Deserializes from JSON (or any serde format); missing fields keep their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Maximum number of live handles.
    pub max_handle_table_size: usize,
    /// Maximum number of handles in a single `wait_many`.
    pub max_wait_many_num_handles: usize,
    /// Maximum message payload size in bytes.
    pub max_message_num_bytes: usize,
    /// Maximum number of handles attached to one message.
    pub max_message_num_handles: usize,
    /// Upper bound for a data pipe's capacity.
    pub max_data_pipe_capacity_bytes: usize,
    /// Capacity used when a data pipe is created without one.
    pub default_data_pipe_capacity_bytes: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_handle_table_size: 1_000_000,
            max_wait_many_num_handles: 1_000_000,
            max_message_num_bytes: 4 * 1024 * 1024,
            max_message_num_handles: 10_000,
            max_data_pipe_capacity_bytes: 256 * 1024 * 1024,
            default_data_pipe_capacity_bytes: DEFAULT_DATA_PIPE_CAPACITY_BYTES,
        }
    }
}

impl CoreConfig {
    /// Reject configurations no core could run with.
    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("max_handle_table_size", self.max_handle_table_size),
            ("max_wait_many_num_handles", self.max_wait_many_num_handles),
            ("max_message_num_bytes", self.max_message_num_bytes),
            (
                "max_data_pipe_capacity_bytes",
                self.max_data_pipe_capacity_bytes,
            ),
            (
                "default_data_pipe_capacity_bytes",
                self.default_data_pipe_capacity_bytes,
            ),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(CoreError::invalid_argument(format!(
                "{name} must be greater than zero"
            )));
        }

        // Handle indices are 32-bit.
        if self.max_handle_table_size > u32::MAX as usize {
            return Err(CoreError::invalid_argument(format!(
                "max_handle_table_size {} exceeds {}",
                self.max_handle_table_size,
                u32::MAX
            )));
        }

        if self.default_data_pipe_capacity_bytes > self.max_data_pipe_capacity_bytes {
            return Err(CoreError::invalid_argument(format!(
                "default_data_pipe_capacity_bytes {} exceeds max_data_pipe_capacity_bytes {}",
                self.default_data_pipe_capacity_bytes, self.max_data_pipe_capacity_bytes
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CoreConfig::default();
        config.validate().unwrap();
        assert_eq!(config.default_data_pipe_capacity_bytes, 1_048_576);
        assert_eq!(config.max_message_num_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"max_message_num_handles": 8}"#).unwrap();
        assert_eq!(config.max_message_num_handles, 8);
        assert_eq!(config.max_handle_table_size, 1_000_000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<CoreConfig>(r#"{"max_pipes": 8}"#);
        assert!(result.is_err());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = CoreConfig {
            max_handle_table_size: 0,
            ..CoreConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_handle_table_size"));
    }

    #[test]
    fn default_capacity_must_fit_max() {
        let config = CoreConfig {
            default_data_pipe_capacity_bytes: 2048,
            max_data_pipe_capacity_bytes: 1024,
            ..CoreConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
