use std::time::{Duration, Instant};

/// Maximum time a wait may block, in microseconds.
///
/// `0` polls, [`Deadline::INDEFINITE`] blocks until the wait resolves, and any
/// other value is a timeout relative to the start of the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Deadline(u64);

impl Deadline {
    /// Return immediately.
    pub const POLL: Deadline = Deadline(0);
    /// Block until satisfied or permanently unsatisfiable.
    pub const INDEFINITE: Deadline = Deadline(u64::MAX);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    pub fn is_poll(self) -> bool {
        self.0 == 0
    }

    pub fn is_indefinite(self) -> bool {
        self == Self::INDEFINITE
    }

    /// Absolute expiry measured from `start`.
    ///
    /// Returns `None` for indefinite deadlines and for timeouts too large to
    /// represent as an `Instant`.
    pub fn expires_at(self, start: Instant) -> Option<Instant> {
        if self.is_indefinite() {
            return None;
        }
        start.checked_add(Duration::from_micros(self.0))
    }
}

impl From<u64> for Deadline {
    fn from(micros: u64) -> Self {
        Self(micros)
    }
}

impl From<Duration> for Deadline {
    fn from(timeout: Duration) -> Self {
        // Saturate so huge durations read as "indefinite" rather than wrapping.
        Self(u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX))
    }
}
