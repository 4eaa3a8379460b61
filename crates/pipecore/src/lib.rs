//! In-process IPC primitives: message pipes, data pipes and signal waits.
//!
//! # Crate Structure
//!
//! - [`sync`]: Signals, deadlines, the monotonic clock and the waiter used by waits
//! - [`system`]: The [`Core`](system::Core) façade with its handle table and pipes
//!
//! Most callers only need [`system::core()`] or their own [`system::Core`].

/// Re-export wait primitives.
pub mod sync {
    pub use pipecore_sync::*;
}

/// Re-export the core façade and pipe types.
pub mod system {
    pub use pipecore_system::*;
}

pub use pipecore_system::{core, Core, CoreConfig, CoreError, Handle, ResultCode};
