use bitflags::bitflags;

bitflags! {
    /// Readiness conditions of a pipe endpoint.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HandleSignals: u32 {
        /// A message or data is available to read.
        const READABLE = 1 << 0;
        /// A write would be accepted.
        const WRITABLE = 1 << 1;
        /// The other endpoint of the pipe has been closed.
        const PEER_CLOSED = 1 << 2;
    }
}

/// Snapshot of an endpoint's signals.
///
/// `satisfied` holds the signals that are true right now. `satisfiable` holds
/// the signals that are true now or may still become true; a signal missing
/// from it can never be raised again on this endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleSignalsState {
    pub satisfied: HandleSignals,
    pub satisfiable: HandleSignals,
}

impl HandleSignalsState {
    pub fn new(satisfied: HandleSignals, satisfiable: HandleSignals) -> Self {
        debug_assert!(
            satisfiable.contains(satisfied),
            "satisfied signals must be satisfiable"
        );
        Self {
            satisfied,
            satisfiable,
        }
    }

    /// True if any signal in `mask` is currently raised.
    pub fn satisfies(&self, mask: HandleSignals) -> bool {
        self.satisfied.intersects(mask)
    }

    /// True if any signal in `mask` is raised now or could be raised later.
    pub fn can_satisfy(&self, mask: HandleSignals) -> bool {
        self.satisfiable.intersects(mask)
    }
}
