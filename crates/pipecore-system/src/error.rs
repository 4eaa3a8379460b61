use crate::handle::Handle;

/// Result codes surfaced by every core operation.
///
/// The set is closed: each [`CoreError`] maps to exactly one non-`Ok` code.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok = 0,
    /// Transient: no data or space yet, the peer is still open.
    ShouldWait = 1,
    /// A wait timed out.
    DeadlineExceeded = 2,
    /// Permanent for the handle's current state (peer gone, nothing left).
    FailedPrecondition = 3,
    /// Caller bug: bad handle or malformed parameters.
    InvalidArgument = 4,
    Internal = 99,
}

impl ResultCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Ok => "OK",
            ResultCode::ShouldWait => "SHOULD_WAIT",
            ResultCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ResultCode::FailedPrecondition => "FAILED_PRECONDITION",
            ResultCode::InvalidArgument => "INVALID_ARGUMENT",
            ResultCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by core operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Nothing to read, or no room to write, while the peer is still open.
    #[error("operation should wait: {0}")]
    ShouldWait(&'static str),

    /// The wait deadline elapsed before any awaited signal was raised.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The peer endpoint is closed and the operation can never succeed.
    #[error("peer closed")]
    PeerClosed,

    /// None of the awaited signals can ever be raised on this handle.
    #[error("awaited signals are unsatisfiable")]
    Unsatisfiable,

    /// The awaited handle was closed while the wait was in progress.
    #[error("handle closed during wait")]
    Cancelled,

    /// The handle is not registered in the handle table.
    #[error("invalid handle {0}")]
    InvalidHandle(Handle),

    /// The handle refers to a resource that does not support the operation.
    #[error("handle {handle} is a {kind}, operation needs a {expected}")]
    WrongHandleType {
        handle: Handle,
        kind: &'static str,
        expected: &'static str,
    },

    /// A parameter is malformed or outside configured limits.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The handle table has no room for more handles.
    #[error("handle table full ({max} handles)")]
    HandleTableFull { max: usize },
}

impl CoreError {
    /// The result code for this error.
    pub fn code(&self) -> ResultCode {
        match self {
            CoreError::ShouldWait(_) => ResultCode::ShouldWait,
            CoreError::DeadlineExceeded => ResultCode::DeadlineExceeded,
            CoreError::PeerClosed | CoreError::Unsatisfiable | CoreError::Cancelled => {
                ResultCode::FailedPrecondition
            }
            CoreError::InvalidHandle(_)
            | CoreError::WrongHandleType { .. }
            | CoreError::InvalidArgument(_) => ResultCode::InvalidArgument,
            CoreError::HandleTableFull { .. } => ResultCode::Internal,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        CoreError::InvalidArgument(message.into())
    }
}

impl From<&CoreError> for ResultCode {
    fn from(err: &CoreError) -> Self {
        err.code()
    }
}

/// Failure of a `wait_many` call.
///
/// `index` identifies the handle that caused the failure; it is `None` when
/// the deadline expired or the arguments themselves were rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}{source}", .index.map(|i| format!("handle #{i}: ")).unwrap_or_default())]
pub struct WaitManyError {
    pub index: Option<usize>,
    #[source]
    pub source: CoreError,
}

impl WaitManyError {
    pub(crate) fn at(index: usize, source: CoreError) -> Self {
        Self {
            index: Some(index),
            source,
        }
    }

    pub(crate) fn general(source: CoreError) -> Self {
        Self {
            index: None,
            source,
        }
    }

    pub fn code(&self) -> ResultCode {
        self.source.code()
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
