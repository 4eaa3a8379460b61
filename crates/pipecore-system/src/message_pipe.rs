use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use pipecore_sync::{HandleSignals, HandleSignalsState, WakeReason, Waiter, WaiterList};
use tracing::trace;

use crate::dispatcher::{close_all, immediate_outcome, Dispatcher};
use crate::error::{CoreError, Result};

/// A message in flight: payload plus resources transferred with it.
pub(crate) struct Message {
    pub(crate) payload: Bytes,
    pub(crate) attachments: Vec<Arc<Dispatcher>>,
}

/// Shared state of both endpoints of a message pipe.
pub(crate) struct MessagePipe {
    state: Mutex<MessagePipeState>,
}

struct MessagePipeState {
    ports: [Port; 2],
}

#[derive(Default)]
struct Port {
    open: bool,
    /// Messages waiting to be read on this port.
    queue: VecDeque<Message>,
    waiters: WaiterList,
}

/// One side of a message pipe.
pub(crate) struct MessagePipeEndpoint {
    pipe: Arc<MessagePipe>,
    port: usize,
    /// Set under the pipe lock once the port has moved to another object.
    detached: AtomicBool,
}

impl MessagePipe {
    /// Create a linked pair of endpoints.
    pub(crate) fn create() -> (MessagePipeEndpoint, MessagePipeEndpoint) {
        let open_port = || Port {
            open: true,
            ..Port::default()
        };
        let pipe = Arc::new(MessagePipe {
            state: Mutex::new(MessagePipeState {
                ports: [open_port(), open_port()],
            }),
        });
        (
            MessagePipeEndpoint::new(Arc::clone(&pipe), 0),
            MessagePipeEndpoint::new(pipe, 1),
        )
    }
}

impl MessagePipeState {
    fn signals_state(&self, port: usize) -> HandleSignalsState {
        let this = &self.ports[port];
        let peer_open = self.ports[1 - port].open;

        let mut satisfied = HandleSignals::empty();
        let mut satisfiable = HandleSignals::PEER_CLOSED;
        if !this.queue.is_empty() {
            satisfied |= HandleSignals::READABLE;
        }
        if peer_open {
            satisfied |= HandleSignals::WRITABLE;
            satisfiable |= HandleSignals::READABLE | HandleSignals::WRITABLE;
        } else {
            satisfied |= HandleSignals::PEER_CLOSED;
        }
        if !this.queue.is_empty() {
            satisfiable |= HandleSignals::READABLE;
        }
        HandleSignalsState::new(satisfied, satisfiable)
    }

    fn awake(&self, port: usize) {
        self.ports[port]
            .waiters
            .awake_for_state_change(self.signals_state(port));
    }
}

impl MessagePipeEndpoint {
    fn new(pipe: Arc<MessagePipe>, port: usize) -> Self {
        Self {
            pipe,
            port,
            detached: AtomicBool::new(false),
        }
    }

    fn peer(&self) -> usize {
        1 - self.port
    }

    /// `Cancelled` once this object no longer stands for an open port.
    fn check_live(&self, state: &MessagePipeState) -> Result<()> {
        if !state.ports[self.port].open || self.detached.load(Ordering::Relaxed) {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }

    /// Move the port to a new endpoint object for a handle transfer.
    ///
    /// Waits registered through this object are cancelled and every later
    /// operation through it fails.
    pub(crate) fn detach(&self) -> MessagePipeEndpoint {
        let mut state = self.pipe.state.lock();
        self.detached.store(true, Ordering::Relaxed);
        state.ports[self.port].waiters.cancel_all();
        MessagePipeEndpoint::new(Arc::clone(&self.pipe), self.port)
    }

    /// True if `other` is the other end of this endpoint's pipe.
    pub(crate) fn is_peer_of(&self, other: &MessagePipeEndpoint) -> bool {
        Arc::ptr_eq(&self.pipe, &other.pipe) && self.port != other.port
    }

    /// Queue `message` on the peer.
    ///
    /// On failure the message is handed back so the caller can restore any
    /// attached handles.
    pub(crate) fn write(&self, message: Message) -> std::result::Result<(), (CoreError, Message)> {
        let mut state = self.pipe.state.lock();
        if let Err(err) = self.check_live(&state) {
            return Err((err, message));
        }
        let peer = self.peer();
        if !state.ports[peer].open {
            return Err((CoreError::PeerClosed, message));
        }

        trace!(
            port = self.port,
            bytes = message.payload.len(),
            handles = message.attachments.len(),
            "message queued"
        );
        state.ports[peer].queue.push_back(message);
        state.awake(peer);
        Ok(())
    }

    /// Dequeue the oldest message.
    ///
    /// `accept` runs under the pipe lock with the message at the head of the
    /// queue; the message is only removed if it succeeds. When it fails and
    /// `discard_on_error` is set, the message is dropped anyway and its
    /// attachments are closed.
    pub(crate) fn read<T>(
        &self,
        discard_on_error: bool,
        accept: impl FnOnce(&Message) -> Result<T>,
    ) -> Result<(Bytes, T)> {
        let mut discarded = None;
        let result = {
            let mut state = self.pipe.state.lock();
            self.check_live(&state)?;
            let peer_open = state.ports[self.peer()].open;
            let port = &mut state.ports[self.port];

            match port.queue.front() {
                None if peer_open => Err(CoreError::ShouldWait("no message queued")),
                None => Err(CoreError::PeerClosed),
                Some(message) => match accept(message) {
                    Ok(accepted) => {
                        let payload = port
                            .queue
                            .pop_front()
                            .map(|message| message.payload)
                            .unwrap_or_default();
                        state.awake(self.port);
                        Ok((payload, accepted))
                    }
                    Err(err) => {
                        if discard_on_error {
                            discarded = port.queue.pop_front();
                            state.awake(self.port);
                        }
                        Err(err)
                    }
                },
            }
        };

        if let Some(message) = discarded {
            trace!(port = self.port, "message discarded");
            close_all(message.attachments);
        }
        result
    }

    pub(crate) fn signals_state(&self) -> HandleSignalsState {
        self.pipe.state.lock().signals_state(self.port)
    }

    pub(crate) fn add_waiter(
        &self,
        waiter: &Arc<Waiter>,
        signals: HandleSignals,
        context: usize,
    ) -> std::result::Result<(), WakeReason> {
        let mut state = self.pipe.state.lock();
        if self.check_live(&state).is_err() {
            return Err(WakeReason::Cancelled);
        }
        immediate_outcome(state.signals_state(self.port), signals)?;
        state.ports[self.port]
            .waiters
            .add(Arc::clone(waiter), signals, context);
        Ok(())
    }

    pub(crate) fn remove_waiter(&self, waiter: &Arc<Waiter>) {
        self.pipe.state.lock().ports[self.port].waiters.remove(waiter);
    }

    /// Close this endpoint. Unread messages addressed to it are destroyed.
    pub(crate) fn close(&self) {
        let undelivered: Vec<Message> = {
            let mut state = self.pipe.state.lock();
            if self.check_live(&state).is_err() {
                return;
            }
            let port = &mut state.ports[self.port];
            port.open = false;
            port.waiters.cancel_all();
            let undelivered = port.queue.drain(..).collect();
            state.awake(self.peer());
            undelivered
        };

        // Attachments may include endpoints of this same pipe, so they are
        // closed only after the lock is released.
        for message in undelivered {
            close_all(message.attachments);
        }
    }
}
