use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use pipecore_sync::{Deadline, HandleSignals, HandleSignalsState, WakeReason, Waiter};
use tracing::{debug, trace};

use crate::config::CoreConfig;
use crate::data_pipe::{CreateDataPipeOptions, DataPipe};
use crate::dispatcher::{close_all, Dispatcher};
use crate::error::{CoreError, Result, WaitManyError};
use crate::flags::{
    CreateMessagePipeOptions, ReadDataFlags, ReadMessageFlags, WriteDataFlags, WriteMessageFlags,
};
use crate::handle::Handle;
use crate::handle_table::HandleTable;
use crate::message_pipe::{Message, MessagePipe};

/// A message taken off a message pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMessage {
    pub bytes: Bytes,
    /// Handles transferred with the message, newly issued to the reader.
    pub handles: Vec<Handle>,
}

/// Entry point for every pipe operation.
///
/// A `Core` owns a handle table; handles from one core mean nothing to
/// another. Use [`core()`] for the process-wide instance or [`Core::new`] for
/// an isolated one. Dropping a core closes every handle it still holds.
pub struct Core {
    config: CoreConfig,
    handles: HandleTable<Dispatcher>,
}

static CORE: OnceLock<Core> = OnceLock::new();

/// The process-wide core, created with default limits on first use.
pub fn core() -> &'static Core {
    CORE.get_or_init(Core::with_default_config)
}

impl Core {
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    pub fn with_default_config() -> Self {
        Self::from_valid_config(CoreConfig::default())
    }

    fn from_valid_config(config: CoreConfig) -> Self {
        debug!(max_handles = config.max_handle_table_size, "core created");
        Self {
            handles: HandleTable::new(config.max_handle_table_size),
            config,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Monotonic time in microseconds.
    pub fn time_ticks_now(&self) -> u64 {
        pipecore_sync::time_ticks_now()
    }

    /// Number of live handles. Handles attached to a write that is still in
    /// progress are counted.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn create_message_pipe(
        &self,
        _options: &CreateMessagePipeOptions,
    ) -> Result<(Handle, Handle)> {
        let (a, b) = MessagePipe::create();
        let (a, b) = self.handles.insert_pair(
            Arc::new(Dispatcher::MessagePipe(a)),
            Arc::new(Dispatcher::MessagePipe(b)),
        )?;
        debug!(%a, %b, "message pipe created");
        Ok((a, b))
    }

    pub fn create_data_pipe(&self, options: &CreateDataPipeOptions) -> Result<(Handle, Handle)> {
        let capacity = options.resolve_capacity(
            self.config.default_data_pipe_capacity_bytes,
            self.config.max_data_pipe_capacity_bytes,
        )?;
        let (producer, consumer) = DataPipe::create(options.element_num_bytes, capacity);
        let (producer, consumer) = self.handles.insert_pair(
            Arc::new(Dispatcher::DataPipeProducer(producer)),
            Arc::new(Dispatcher::DataPipeConsumer(consumer)),
        )?;
        debug!(
            %producer,
            %consumer,
            capacity,
            element_num_bytes = options.element_num_bytes,
            "data pipe created"
        );
        Ok((producer, consumer))
    }

    /// Queue a message on the peer of `handle`.
    ///
    /// Attached handles are invalid to the caller once this returns `Ok`; on
    /// any error they stay valid and keep their resources. Waits on attached
    /// handles are cancelled once the message is built, even if the write then
    /// fails.
    pub fn write_message(
        &self,
        handle: Handle,
        bytes: &[u8],
        handles: &[Handle],
        _flags: WriteMessageFlags,
    ) -> Result<()> {
        let dispatcher = self.handles.get(handle)?;
        let endpoint = dispatcher.as_message_pipe(handle)?;

        if bytes.len() > self.config.max_message_num_bytes {
            return Err(CoreError::invalid_argument(format!(
                "message of {} bytes exceeds limit {}",
                bytes.len(),
                self.config.max_message_num_bytes
            )));
        }
        if handles.len() > self.config.max_message_num_handles {
            return Err(CoreError::invalid_argument(format!(
                "{} attached handles exceed limit {}",
                handles.len(),
                self.config.max_message_num_handles
            )));
        }
        if handles.contains(&handle) {
            return Err(CoreError::invalid_argument(format!(
                "handle {handle} cannot be attached to its own message"
            )));
        }

        let mut transit = self.handles.begin_transit(handles)?;
        let sends_peer = transit.values().iter().any(|value| {
            matches!(&**value, Dispatcher::MessagePipe(other) if other.is_peer_of(endpoint))
        });
        if sends_peer {
            close_all(self.handles.abort_transit(transit));
            return Err(CoreError::invalid_argument(format!(
                "the peer of handle {handle} cannot be sent through its own pipe"
            )));
        }

        // Objects still held by other callers of the attached handles go dead
        // here; the message carries fresh ones.
        let attachments: Vec<Arc<Dispatcher>> = transit
            .values()
            .iter()
            .map(|value| Arc::new(value.detach()))
            .collect();
        transit.replace_values(attachments.clone());
        let message = Message {
            payload: Bytes::copy_from_slice(bytes),
            attachments,
        };
        match endpoint.write(message) {
            Ok(()) => {
                if !transit.handles().is_empty() {
                    debug!(%handle, transferred = transit.handles().len(), "handles sent");
                }
                // The message now owns the resources.
                let _ = self.handles.commit_transit(transit);
                Ok(())
            }
            Err((err, message)) => {
                drop(message);
                close_all(self.handles.abort_transit(transit));
                Err(closed_as_invalid(handle, err))
            }
        }
    }

    /// Take the oldest message queued on `handle`.
    pub fn read_message(&self, handle: Handle, flags: ReadMessageFlags) -> Result<ReadMessage> {
        let dispatcher = self.handles.get(handle)?;
        let endpoint = dispatcher.as_message_pipe(handle)?;

        let (bytes, handles) = endpoint
            .read(flags.contains(ReadMessageFlags::MAY_DISCARD), |message| {
                self.handles.insert_many(&message.attachments)
            })
            .map_err(|err| closed_as_invalid(handle, err))?;
        if !handles.is_empty() {
            debug!(%handle, received = handles.len(), "handles received");
        }
        trace!(%handle, bytes = bytes.len(), "message read");
        Ok(ReadMessage { bytes, handles })
    }

    /// Write to a data pipe producer. Returns the number of bytes accepted.
    pub fn write_data(&self, handle: Handle, bytes: &[u8], flags: WriteDataFlags) -> Result<usize> {
        let dispatcher = self.handles.get(handle)?;
        dispatcher
            .as_producer(handle)?
            .write(bytes, flags.contains(WriteDataFlags::ALL_OR_NONE))
            .map_err(|err| closed_as_invalid(handle, err))
    }

    /// Read everything buffered in a data pipe.
    pub fn read_data(&self, handle: Handle, flags: ReadDataFlags) -> Result<Bytes> {
        self.read_data_inner(handle, None, flags)
    }

    /// Read at most `max_bytes`, rounded down to whole elements.
    pub fn read_data_up_to(
        &self,
        handle: Handle,
        max_bytes: usize,
        flags: ReadDataFlags,
    ) -> Result<Bytes> {
        self.read_data_inner(handle, Some(max_bytes), flags)
    }

    fn read_data_inner(
        &self,
        handle: Handle,
        max_bytes: Option<usize>,
        flags: ReadDataFlags,
    ) -> Result<Bytes> {
        let dispatcher = self.handles.get(handle)?;
        dispatcher
            .as_consumer(handle)?
            .read(
                max_bytes,
                flags.contains(ReadDataFlags::ALL_OR_NONE),
                flags.contains(ReadDataFlags::PEEK),
            )
            .map_err(|err| closed_as_invalid(handle, err))
    }

    /// Drop up to `max_bytes` from a data pipe. `PEEK` is ignored.
    pub fn discard_data(&self, handle: Handle, max_bytes: usize, flags: ReadDataFlags) -> Result<usize> {
        let dispatcher = self.handles.get(handle)?;
        dispatcher
            .as_consumer(handle)?
            .discard(max_bytes, flags.contains(ReadDataFlags::ALL_OR_NONE))
            .map_err(|err| closed_as_invalid(handle, err))
    }

    /// Number of bytes buffered in a data pipe.
    pub fn query_data(&self, handle: Handle) -> Result<usize> {
        let dispatcher = self.handles.get(handle)?;
        dispatcher
            .as_consumer(handle)?
            .query()
            .map_err(|err| closed_as_invalid(handle, err))
    }

    /// Current signal state of any handle.
    pub fn signals_state(&self, handle: Handle) -> Result<HandleSignalsState> {
        Ok(self.handles.get(handle)?.signals_state())
    }

    /// Block until one of `signals` is raised on `handle`.
    ///
    /// Fails with `DeadlineExceeded` on timeout and with a
    /// `FAILED_PRECONDITION` error once none of `signals` can ever be raised
    /// or the handle is closed during the wait.
    pub fn wait(
        &self,
        handle: Handle,
        signals: HandleSignals,
        deadline: impl Into<Deadline>,
    ) -> Result<HandleSignalsState> {
        let dispatcher = self.handles.get(handle)?;
        let waiter = Arc::new(Waiter::new());

        let outcome = match dispatcher.add_waiter(&waiter, signals, 0) {
            Err(immediate) => Some(immediate),
            Ok(()) => {
                let woken = waiter.wait(deadline.into());
                dispatcher.remove_waiter(&waiter);
                woken.map(|(reason, _)| reason)
            }
        };

        match outcome {
            Some(WakeReason::Satisfied) => Ok(dispatcher.signals_state()),
            Some(reason) => Err(wake_error(reason)),
            None => Err(CoreError::DeadlineExceeded),
        }
    }

    /// Block until one of `signals[i]` is raised on `handles[i]` for some `i`.
    ///
    /// Returns that index. Errors caused by a specific handle carry its index.
    pub fn wait_many(
        &self,
        handles: &[Handle],
        signals: &[HandleSignals],
        deadline: impl Into<Deadline>,
    ) -> std::result::Result<usize, WaitManyError> {
        if handles.len() != signals.len() {
            return Err(WaitManyError::general(CoreError::invalid_argument(format!(
                "{} handles but {} signal masks",
                handles.len(),
                signals.len()
            ))));
        }
        if handles.is_empty() {
            return Err(WaitManyError::general(CoreError::invalid_argument(
                "no handles to wait on",
            )));
        }
        if handles.len() > self.config.max_wait_many_num_handles {
            return Err(WaitManyError::general(CoreError::invalid_argument(format!(
                "{} handles exceed limit {}",
                handles.len(),
                self.config.max_wait_many_num_handles
            ))));
        }

        let dispatchers = handles
            .iter()
            .enumerate()
            .map(|(index, &handle)| {
                self.handles
                    .get(handle)
                    .map_err(|err| WaitManyError::at(index, err))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let waiter = Arc::new(Waiter::new());
        let mut registered = 0;
        let mut immediate = None;
        for (index, (dispatcher, &mask)) in dispatchers.iter().zip(signals).enumerate() {
            if let Err(reason) = dispatcher.add_waiter(&waiter, mask, index) {
                immediate = Some((reason, index));
                break;
            }
            registered += 1;
        }

        let outcome = match immediate {
            Some(outcome) => Some(outcome),
            None => waiter.wait(deadline.into()),
        };
        for dispatcher in &dispatchers[..registered] {
            dispatcher.remove_waiter(&waiter);
        }

        match outcome {
            Some((WakeReason::Satisfied, index)) => Ok(index),
            Some((reason, index)) => Err(WaitManyError::at(index, wake_error(reason))),
            None => Err(WaitManyError::general(CoreError::DeadlineExceeded)),
        }
    }

    /// Close a handle. The handle is invalid from now on, even if this fails
    /// to find it.
    pub fn close(&self, handle: Handle) -> Result<()> {
        let dispatcher = self.handles.remove(handle)?;
        debug!(%handle, kind = dispatcher.kind(), "handle closed");
        dispatcher.close();
        Ok(())
    }

    /// Close every handle; returns how many were open.
    pub fn shutdown(&self) -> usize {
        let open = self.handles.drain();
        let count = open.len();
        if count > 0 {
            debug!(count, "closing remaining handles");
        }
        close_all(open);
        count
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("config", &self.config)
            .field("handles", &self.handles)
            .finish()
    }
}

fn wake_error(reason: WakeReason) -> CoreError {
    match reason {
        WakeReason::Satisfied | WakeReason::Unsatisfiable => CoreError::Unsatisfiable,
        WakeReason::Cancelled => CoreError::Cancelled,
    }
}

/// An operation that finds its endpoint closed or sent away after the handle
/// lookup reports the handle as invalid.
fn closed_as_invalid(handle: Handle, err: CoreError) -> CoreError {
    match err {
        CoreError::Cancelled => CoreError::InvalidHandle(handle),
        other => other,
    }
}
