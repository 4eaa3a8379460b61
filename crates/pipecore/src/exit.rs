use std::io;

use pipecore::system::{CoreError, ResultCode};

// Process exit codes.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

/// A command failure: the message for stderr and the exit code to leave with.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn code_for(result: ResultCode) -> i32 {
    match result {
        ResultCode::Ok => SUCCESS,
        ResultCode::ShouldWait | ResultCode::DeadlineExceeded => TIMEOUT,
        ResultCode::FailedPrecondition => FAILURE,
        ResultCode::InvalidArgument => USAGE,
        ResultCode::Internal => INTERNAL,
    }
}

pub fn core_error(context: &str, err: CoreError) -> CliError {
    CliError::new(code_for(err.code()), format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_map_to_exit_codes() {
        assert_eq!(core_error("x", CoreError::DeadlineExceeded).code, TIMEOUT);
        assert_eq!(core_error("x", CoreError::PeerClosed).code, FAILURE);
        assert_eq!(
            core_error("x", CoreError::InvalidArgument("bad".into())).code,
            USAGE
        );
        assert_eq!(
            core_error("x", CoreError::HandleTableFull { max: 1 }).code,
            INTERNAL
        );
    }

    #[test]
    fn message_keeps_context() {
        let err = core_error("read failed", CoreError::PeerClosed);
        assert_eq!(err.to_string(), "read failed: peer closed");
    }
}
