use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use pipecore_sync::{HandleSignals, HandleSignalsState, WakeReason, Waiter, WaiterList};
use ringbuf::{traits::*, HeapRb};
use tracing::trace;

use crate::dispatcher::immediate_outcome;
use crate::error::{CoreError, Result};

/// Options for creating a data pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateDataPipeOptions {
    /// Size of one element; every transfer is a whole number of elements.
    pub element_num_bytes: usize,
    /// Buffer capacity in bytes. `None` picks the configured default,
    /// rounded down to a whole number of elements.
    pub capacity_num_bytes: Option<usize>,
}

impl Default for CreateDataPipeOptions {
    fn default() -> Self {
        Self {
            element_num_bytes: 1,
            capacity_num_bytes: None,
        }
    }
}

impl CreateDataPipeOptions {
    /// Work out the buffer capacity, checking it against `max_capacity`.
    pub(crate) fn resolve_capacity(
        &self,
        default_capacity: usize,
        max_capacity: usize,
    ) -> Result<usize> {
        let element = self.element_num_bytes;
        if element == 0 {
            return Err(CoreError::invalid_argument(
                "element_num_bytes must be greater than zero",
            ));
        }

        let capacity = match self.capacity_num_bytes {
            Some(0) => {
                return Err(CoreError::invalid_argument(
                    "capacity_num_bytes must be greater than zero",
                ))
            }
            Some(capacity) if capacity % element != 0 => {
                return Err(CoreError::invalid_argument(format!(
                    "capacity_num_bytes {capacity} is not a multiple of element_num_bytes {element}"
                )))
            }
            Some(capacity) => capacity,
            None => (default_capacity / element) * element,
        };

        if capacity == 0 {
            return Err(CoreError::invalid_argument(format!(
                "element_num_bytes {element} exceeds the default capacity {default_capacity}"
            )));
        }
        if capacity > max_capacity {
            return Err(CoreError::invalid_argument(format!(
                "capacity {capacity} exceeds the maximum {max_capacity}"
            )));
        }
        Ok(capacity)
    }
}

/// Shared state behind a producer/consumer pair.
pub(crate) struct DataPipe {
    element_num_bytes: usize,
    capacity: usize,
    state: Mutex<DataPipeState>,
}

struct DataPipeState {
    buffer: HeapRb<u8>,
    producer_open: bool,
    consumer_open: bool,
    producer_waiters: WaiterList,
    consumer_waiters: WaiterList,
}

pub(crate) struct DataPipeProducer {
    pipe: Arc<DataPipe>,
    /// Set under the pipe lock once the producer has moved to another object.
    detached: AtomicBool,
}

pub(crate) struct DataPipeConsumer {
    pipe: Arc<DataPipe>,
    detached: AtomicBool,
}

impl DataPipe {
    /// Create a pipe; `capacity` must already be a whole number of elements.
    pub(crate) fn create(
        element_num_bytes: usize,
        capacity: usize,
    ) -> (DataPipeProducer, DataPipeConsumer) {
        let pipe = Arc::new(DataPipe {
            element_num_bytes,
            capacity,
            state: Mutex::new(DataPipeState {
                buffer: HeapRb::new(capacity),
                producer_open: true,
                consumer_open: true,
                producer_waiters: WaiterList::new(),
                consumer_waiters: WaiterList::new(),
            }),
        });
        (
            DataPipeProducer::new(Arc::clone(&pipe)),
            DataPipeConsumer::new(pipe),
        )
    }

    fn check_multiple(&self, what: &str, num_bytes: usize) -> Result<()> {
        if num_bytes % self.element_num_bytes != 0 {
            return Err(CoreError::invalid_argument(format!(
                "{what} {num_bytes} is not a multiple of element_num_bytes {}",
                self.element_num_bytes
            )));
        }
        Ok(())
    }

    fn producer_state(&self, state: &DataPipeState) -> HandleSignalsState {
        if !state.consumer_open {
            return HandleSignalsState::new(HandleSignals::PEER_CLOSED, HandleSignals::PEER_CLOSED);
        }
        let mut satisfied = HandleSignals::empty();
        if state.buffer.vacant_len() >= self.element_num_bytes {
            satisfied |= HandleSignals::WRITABLE;
        }
        HandleSignalsState::new(
            satisfied,
            HandleSignals::WRITABLE | HandleSignals::PEER_CLOSED,
        )
    }

    fn consumer_state(&self, state: &DataPipeState) -> HandleSignalsState {
        let buffered = !state.buffer.is_empty();
        let mut satisfied = HandleSignals::empty();
        let mut satisfiable = HandleSignals::PEER_CLOSED;
        if buffered {
            satisfied |= HandleSignals::READABLE;
        }
        if buffered || state.producer_open {
            satisfiable |= HandleSignals::READABLE;
        }
        if !state.producer_open {
            satisfied |= HandleSignals::PEER_CLOSED;
        }
        HandleSignalsState::new(satisfied, satisfiable)
    }

    fn awake_all(&self, state: &DataPipeState) {
        state
            .producer_waiters
            .awake_for_state_change(self.producer_state(state));
        state
            .consumer_waiters
            .awake_for_state_change(self.consumer_state(state));
    }

    /// Work out how many bytes a read or discard moves, or why it can't.
    fn readable_len(
        &self,
        state: &DataPipeState,
        max_num_bytes: Option<usize>,
        all_or_none: bool,
    ) -> Result<usize> {
        // A limit is rounded down to whole elements.
        let max_num_bytes = max_num_bytes.map(|max| max - max % self.element_num_bytes);
        if max_num_bytes == Some(0) {
            return Err(CoreError::invalid_argument(format!(
                "num_bytes must cover at least one element of {} bytes",
                self.element_num_bytes
            )));
        }

        let buffered = state.buffer.occupied_len();
        let not_enough = || {
            if state.producer_open {
                CoreError::ShouldWait("data pipe empty")
            } else {
                CoreError::PeerClosed
            }
        };
        if buffered == 0 {
            return Err(not_enough());
        }

        let wanted = max_num_bytes.unwrap_or(buffered);
        if all_or_none && wanted > buffered {
            return Err(not_enough());
        }
        Ok(wanted.min(buffered))
    }
}

impl DataPipeProducer {
    fn new(pipe: Arc<DataPipe>) -> Self {
        Self {
            pipe,
            detached: AtomicBool::new(false),
        }
    }

    fn check_live(&self, state: &DataPipeState) -> Result<()> {
        if !state.producer_open || self.detached.load(Ordering::Relaxed) {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }

    /// Move the producer to a new object; see `MessagePipeEndpoint::detach`.
    pub(crate) fn detach(&self) -> DataPipeProducer {
        let mut state = self.pipe.state.lock();
        self.detached.store(true, Ordering::Relaxed);
        state.producer_waiters.cancel_all();
        DataPipeProducer::new(Arc::clone(&self.pipe))
    }

    /// Copy as much of `data` as fits. Returns the number of bytes written.
    pub(crate) fn write(&self, data: &[u8], all_or_none: bool) -> Result<usize> {
        let pipe = &self.pipe;
        let mut state = pipe.state.lock();
        self.check_live(&state)?;
        if !state.consumer_open {
            return Err(CoreError::PeerClosed);
        }
        pipe.check_multiple("num_bytes", data.len())?;
        if data.is_empty() {
            return Ok(0);
        }

        let vacant = state.buffer.vacant_len();
        if all_or_none {
            if data.len() > pipe.capacity {
                return Err(CoreError::invalid_argument(format!(
                    "write of {} bytes exceeds data pipe capacity {}",
                    data.len(),
                    pipe.capacity
                )));
            }
            if data.len() > vacant {
                return Err(CoreError::ShouldWait("data pipe lacks room for the whole write"));
            }
        }
        if vacant == 0 {
            return Err(CoreError::ShouldWait("data pipe full"));
        }

        let written = state.buffer.push_slice(&data[..data.len().min(vacant)]);
        trace!(written, buffered = state.buffer.occupied_len(), "data written");
        pipe.awake_all(&state);
        Ok(written)
    }

    pub(crate) fn signals_state(&self) -> HandleSignalsState {
        let state = self.pipe.state.lock();
        self.pipe.producer_state(&state)
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
        immediate_outcome(self.pipe.producer_state(&state), signals)?;
        state
            .producer_waiters
            .add(Arc::clone(waiter), signals, context);
        Ok(())
    }

    pub(crate) fn remove_waiter(&self, waiter: &Arc<Waiter>) {
        self.pipe.state.lock().producer_waiters.remove(waiter);
    }

    pub(crate) fn close(&self) {
        let mut state = self.pipe.state.lock();
        if self.check_live(&state).is_err() {
            return;
        }
        state.producer_open = false;
        state.producer_waiters.cancel_all();
        self.pipe.awake_all(&state);
    }
}

impl DataPipeConsumer {
    fn new(pipe: Arc<DataPipe>) -> Self {
        Self {
            pipe,
            detached: AtomicBool::new(false),
        }
    }

    fn check_live(&self, state: &DataPipeState) -> Result<()> {
        if !state.consumer_open || self.detached.load(Ordering::Relaxed) {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn detach(&self) -> DataPipeConsumer {
        let mut state = self.pipe.state.lock();
        self.detached.store(true, Ordering::Relaxed);
        state.consumer_waiters.cancel_all();
        DataPipeConsumer::new(Arc::clone(&self.pipe))
    }

    /// Take (or with `peek`, copy) up to `max_num_bytes` buffered bytes; `None`
    /// means everything currently buffered.
    pub(crate) fn read(
        &self,
        max_num_bytes: Option<usize>,
        all_or_none: bool,
        peek: bool,
    ) -> Result<Bytes> {
        let pipe = &self.pipe;
        let mut state = pipe.state.lock();
        self.check_live(&state)?;
        let len = pipe.readable_len(&state, max_num_bytes, all_or_none)?;

        let data: Vec<u8> = if peek {
            state.buffer.iter().take(len).copied().collect()
        } else {
            let mut data = vec![0u8; len];
            let read = state.buffer.pop_slice(&mut data);
            data.truncate(read);
            pipe.awake_all(&state);
            data
        };
        trace!(len = data.len(), peek, "data read");
        Ok(Bytes::from(data))
    }

    /// Drop up to `max_num_bytes` buffered bytes without copying them out.
    pub(crate) fn discard(&self, max_num_bytes: usize, all_or_none: bool) -> Result<usize> {
        let pipe = &self.pipe;
        let mut state = pipe.state.lock();
        self.check_live(&state)?;
        let len = pipe.readable_len(&state, Some(max_num_bytes), all_or_none)?;
        let discarded = state.buffer.skip(len);
        trace!(discarded, "data discarded");
        pipe.awake_all(&state);
        Ok(discarded)
    }

    /// Bytes currently buffered.
    pub(crate) fn query(&self) -> Result<usize> {
        let state = self.pipe.state.lock();
        self.check_live(&state)?;
        Ok(state.buffer.occupied_len())
    }

    pub(crate) fn signals_state(&self) -> HandleSignalsState {
        let state = self.pipe.state.lock();
        self.pipe.consumer_state(&state)
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
        immediate_outcome(self.pipe.consumer_state(&state), signals)?;
        state
            .consumer_waiters
            .add(Arc::clone(waiter), signals, context);
        Ok(())
    }

    pub(crate) fn remove_waiter(&self, waiter: &Arc<Waiter>) {
        self.pipe.state.lock().consumer_waiters.remove(waiter);
    }

    /// Close the consumer; buffered data is thrown away.
    pub(crate) fn close(&self) {
        let mut state = self.pipe.state.lock();
        if self.check_live(&state).is_err() {
            return;
        }
        state.consumer_open = false;
        let buffered = state.buffer.occupied_len();
        state.buffer.skip(buffered);
        state.consumer_waiters.cancel_all();
        self.pipe.awake_all(&state);
    }
}
