//! Wait/wake plumbing shared by every pipecore handle type.
//!
//! This is the lowest layer of pipecore:
//! - [`HandleSignals`] / [`HandleSignalsState`] describe endpoint readiness
//! - [`Deadline`] encodes poll / relative / indefinite waits
//! - [`Waiter`] and [`WaiterList`] park a thread until a signal mask is
//!   satisfied, becomes unsatisfiable, or the handle goes away
//! - [`time_ticks_now`] is the monotonic microsecond clock

pub mod clock;
pub mod deadline;
pub mod signals;
pub mod waiter;

pub use clock::time_ticks_now;
pub use deadline::Deadline;
pub use signals::{HandleSignals, HandleSignalsState};
pub use waiter::{WakeReason, Waiter, WaiterList};
