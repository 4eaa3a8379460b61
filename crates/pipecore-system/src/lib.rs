//! In-process IPC core: handles, message pipes, data pipes and waits.
//!
//! Everything goes through a [`Core`]:
//!
//! ```
//! use pipecore_system::{
//!     Core, CreateMessagePipeOptions, Deadline, HandleSignals, ReadMessageFlags,
//!     WriteMessageFlags,
//! };
//!
//! let core = Core::with_default_config();
//! let (a, b) = core.create_message_pipe(&CreateMessagePipeOptions::default())?;
//! core.write_message(a, b"hello", &[], WriteMessageFlags::NONE)?;
//! core.wait(b, HandleSignals::READABLE, Deadline::INDEFINITE)?;
//! assert_eq!(core.read_message(b, ReadMessageFlags::empty())?.bytes, "hello");
//! # Ok::<(), pipecore_system::CoreError>(())
//! ```
//!
//! Operations never block except [`Core::wait`] and [`Core::wait_many`].
//! Internally each pipe has its own lock and the handle table has another;
//! a pipe lock may be held while the table is locked, never the other way
//! around.

pub mod config;
pub mod data_pipe;
mod dispatcher;
pub mod error;
pub mod facade;
pub mod flags;
pub mod handle;
pub mod handle_table;
mod message_pipe;

pub use crate::config::{CoreConfig, DEFAULT_DATA_PIPE_CAPACITY_BYTES};
pub use crate::data_pipe::CreateDataPipeOptions;
pub use crate::error::{CoreError, Result, ResultCode, WaitManyError};
pub use crate::facade::{core, Core, ReadMessage};
pub use crate::flags::{
    CreateMessagePipeOptions, ReadDataFlags, ReadMessageFlags, WriteDataFlags, WriteMessageFlags,
};
pub use crate::handle::{Handle, INVALID_HANDLE_VALUE};
pub use crate::handle_table::{HandleTable, Transit};
pub use pipecore_sync::{time_ticks_now, Deadline, HandleSignals, HandleSignalsState};
