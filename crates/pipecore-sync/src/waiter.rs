use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::deadline::Deadline;
use crate::signals::{HandleSignals, HandleSignalsState};

/// Why a [`Waiter`] was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// At least one awaited signal is raised.
    Satisfied,
    /// None of the awaited signals can ever be raised again.
    Unsatisfiable,
    /// The awaited handle was closed during the wait.
    Cancelled,
}

/// A parked wait over one or more endpoints.
///
/// Endpoints hold the waiter in their [`WaiterList`] and call [`Waiter::awake`]
/// when their signal state changes. Only the first awake is recorded; later
/// ones are ignored so a `wait_many` reports a single handle.
#[derive(Debug, Default)]
pub struct Waiter {
    woken: Mutex<Option<(WakeReason, usize)>>,
    cond: Condvar,
}

impl Waiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a wake-up for the registration identified by `context`.
    pub fn awake(&self, reason: WakeReason, context: usize) {
        let mut woken = self.woken.lock();
        if woken.is_none() {
            trace!(?reason, context, "waiter awoken");
            *woken = Some((reason, context));
            self.cond.notify_all();
        }
    }

    /// Block until awoken or until `deadline` elapses.
    ///
    /// Returns `None` on timeout. A poll deadline never blocks.
    pub fn wait(&self, deadline: Deadline) -> Option<(WakeReason, usize)> {
        let expires_at = deadline.expires_at(Instant::now());
        let mut woken = self.woken.lock();

        if deadline.is_poll() {
            return *woken;
        }

        loop {
            if let Some(result) = *woken {
                return Some(result);
            }
            match expires_at {
                None => self.cond.wait(&mut woken),
                Some(at) => {
                    if self.cond.wait_until(&mut woken, at).timed_out() {
                        return *woken;
                    }
                }
            }
        }
    }
}

struct Registration {
    waiter: Arc<Waiter>,
    signals: HandleSignals,
    context: usize,
}

/// Waiters registered on a single endpoint.
///
/// Owned by the endpoint's pipe state and only touched under the pipe lock.
#[derive(Default)]
pub struct WaiterList {
    registrations: Vec<Registration>,
}

impl WaiterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, waiter: Arc<Waiter>, signals: HandleSignals, context: usize) {
        self.registrations.push(Registration {
            waiter,
            signals,
            context,
        });
    }

    pub fn remove(&mut self, waiter: &Arc<Waiter>) {
        self.registrations
            .retain(|registration| !Arc::ptr_eq(&registration.waiter, waiter));
    }

    /// Wake every waiter whose mask became satisfied or unsatisfiable.
    pub fn awake_for_state_change(&self, state: HandleSignalsState) {
        for registration in &self.registrations {
            if state.satisfies(registration.signals) {
                registration
                    .waiter
                    .awake(WakeReason::Satisfied, registration.context);
            } else if !state.can_satisfy(registration.signals) {
                registration
                    .waiter
                    .awake(WakeReason::Unsatisfiable, registration.context);
            }
        }
    }

    /// Wake and drop every registration; the endpoint is going away.
    pub fn cancel_all(&mut self) {
        for registration in self.registrations.drain(..) {
            registration
                .waiter
                .awake(WakeReason::Cancelled, registration.context);
        }
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl std::fmt::Debug for WaiterList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaiterList")
            .field("registrations", &self.registrations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn poll_returns_without_blocking() {
        let waiter = Waiter::new();
        let start = Instant::now();
        assert_eq!(waiter.wait(Deadline::POLL), None);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn timeout_elapses() {
        let waiter = Waiter::new();
        let start = Instant::now();
        assert_eq!(waiter.wait(Deadline::from_micros(20_000)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn first_awake_wins() {
        let waiter = Waiter::new();
        waiter.awake(WakeReason::Unsatisfiable, 3);
        waiter.awake(WakeReason::Satisfied, 1);
        assert_eq!(
            waiter.wait(Deadline::INDEFINITE),
            Some((WakeReason::Unsatisfiable, 3))
        );
    }

    #[test]
    fn awake_from_other_thread_unblocks_indefinite_wait() {
        let waiter = Arc::new(Waiter::new());
        let remote = Arc::clone(&waiter);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.awake(WakeReason::Satisfied, 7);
        });

        assert_eq!(
            waiter.wait(Deadline::INDEFINITE),
            Some((WakeReason::Satisfied, 7))
        );
        handle.join().unwrap();
    }

    #[test]
    fn list_wakes_on_satisfied_and_unsatisfiable() {
        let readable = Arc::new(Waiter::new());
        let writable = Arc::new(Waiter::new());
        let mut list = WaiterList::new();
        list.add(Arc::clone(&readable), HandleSignals::READABLE, 0);
        list.add(Arc::clone(&writable), HandleSignals::WRITABLE, 1);

        // Readable now, writable gone for good.
        list.awake_for_state_change(HandleSignalsState::new(
            HandleSignals::READABLE | HandleSignals::PEER_CLOSED,
            HandleSignals::READABLE | HandleSignals::PEER_CLOSED,
        ));

        assert_eq!(
            readable.wait(Deadline::POLL),
            Some((WakeReason::Satisfied, 0))
        );
        assert_eq!(
            writable.wait(Deadline::POLL),
            Some((WakeReason::Unsatisfiable, 1))
        );
    }

    #[test]
    fn list_leaves_pending_waiters_alone() {
        let waiter = Arc::new(Waiter::new());
        let mut list = WaiterList::new();
        list.add(Arc::clone(&waiter), HandleSignals::READABLE, 0);

        list.awake_for_state_change(HandleSignalsState::new(
            HandleSignals::WRITABLE,
            HandleSignals::all(),
        ));
        assert_eq!(waiter.wait(Deadline::POLL), None);
    }

    #[test]
    fn remove_and_cancel() {
        let kept = Arc::new(Waiter::new());
        let removed = Arc::new(Waiter::new());
        let mut list = WaiterList::new();
        list.add(Arc::clone(&kept), HandleSignals::READABLE, 4);
        list.add(Arc::clone(&removed), HandleSignals::READABLE, 5);

        list.remove(&removed);
        assert_eq!(list.len(), 1);

        list.cancel_all();
        assert!(list.is_empty());
        assert_eq!(kept.wait(Deadline::POLL), Some((WakeReason::Cancelled, 4)));
        assert_eq!(removed.wait(Deadline::POLL), None);
    }
}
