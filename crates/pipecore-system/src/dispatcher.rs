use std::sync::Arc;

use pipecore_sync::{HandleSignals, HandleSignalsState, WakeReason, Waiter};
use tracing::debug;

use crate::data_pipe::{DataPipeConsumer, DataPipeProducer};
use crate::error::{CoreError, Result};
use crate::handle::Handle;
use crate::message_pipe::MessagePipeEndpoint;

/// The resource a handle refers to.
pub(crate) enum Dispatcher {
    MessagePipe(MessagePipeEndpoint),
    DataPipeProducer(DataPipeProducer),
    DataPipeConsumer(DataPipeConsumer),
}

impl Dispatcher {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Dispatcher::MessagePipe(_) => MESSAGE_PIPE,
            Dispatcher::DataPipeProducer(_) => DATA_PIPE_PRODUCER,
            Dispatcher::DataPipeConsumer(_) => DATA_PIPE_CONSUMER,
        }
    }

    pub(crate) fn signals_state(&self) -> HandleSignalsState {
        match self {
            Dispatcher::MessagePipe(endpoint) => endpoint.signals_state(),
            Dispatcher::DataPipeProducer(producer) => producer.signals_state(),
            Dispatcher::DataPipeConsumer(consumer) => consumer.signals_state(),
        }
    }

    /// Register `waiter` for `signals`.
    ///
    /// `Err` carries the outcome when the wait resolves without blocking; the
    /// waiter is then not registered.
    pub(crate) fn add_waiter(
        &self,
        waiter: &Arc<Waiter>,
        signals: HandleSignals,
        context: usize,
    ) -> std::result::Result<(), WakeReason> {
        match self {
            Dispatcher::MessagePipe(endpoint) => endpoint.add_waiter(waiter, signals, context),
            Dispatcher::DataPipeProducer(producer) => producer.add_waiter(waiter, signals, context),
            Dispatcher::DataPipeConsumer(consumer) => consumer.add_waiter(waiter, signals, context),
        }
    }

    pub(crate) fn remove_waiter(&self, waiter: &Arc<Waiter>) {
        match self {
            Dispatcher::MessagePipe(endpoint) => endpoint.remove_waiter(waiter),
            Dispatcher::DataPipeProducer(producer) => producer.remove_waiter(waiter),
            Dispatcher::DataPipeConsumer(consumer) => consumer.remove_waiter(waiter),
        }
    }

    pub(crate) fn close(&self) {
        match self {
            Dispatcher::MessagePipe(endpoint) => endpoint.close(),
            Dispatcher::DataPipeProducer(producer) => producer.close(),
            Dispatcher::DataPipeConsumer(consumer) => consumer.close(),
        }
    }

    /// Hand the resource to a new dispatcher for a handle transfer; this one
    /// goes dead and its pending waits are cancelled.
    pub(crate) fn detach(&self) -> Dispatcher {
        match self {
            Dispatcher::MessagePipe(endpoint) => Dispatcher::MessagePipe(endpoint.detach()),
            Dispatcher::DataPipeProducer(producer) => {
                Dispatcher::DataPipeProducer(producer.detach())
            }
            Dispatcher::DataPipeConsumer(consumer) => {
                Dispatcher::DataPipeConsumer(consumer.detach())
            }
        }
    }

    pub(crate) fn as_message_pipe(&self, handle: Handle) -> Result<&MessagePipeEndpoint> {
        match self {
            Dispatcher::MessagePipe(endpoint) => Ok(endpoint),
            _ => Err(self.wrong_type(handle, MESSAGE_PIPE)),
        }
    }

    pub(crate) fn as_producer(&self, handle: Handle) -> Result<&DataPipeProducer> {
        match self {
            Dispatcher::DataPipeProducer(producer) => Ok(producer),
            _ => Err(self.wrong_type(handle, DATA_PIPE_PRODUCER)),
        }
    }

    pub(crate) fn as_consumer(&self, handle: Handle) -> Result<&DataPipeConsumer> {
        match self {
            Dispatcher::DataPipeConsumer(consumer) => Ok(consumer),
            _ => Err(self.wrong_type(handle, DATA_PIPE_CONSUMER)),
        }
    }

    fn wrong_type(&self, handle: Handle, expected: &'static str) -> CoreError {
        CoreError::WrongHandleType {
            handle,
            kind: self.kind(),
            expected,
        }
    }
}

const MESSAGE_PIPE: &str = "message pipe endpoint";
const DATA_PIPE_PRODUCER: &str = "data pipe producer";
const DATA_PIPE_CONSUMER: &str = "data pipe consumer";

/// Close resources that left the handle table and will never return to it.
pub(crate) fn close_all(dispatchers: Vec<Arc<Dispatcher>>) {
    for dispatcher in dispatchers {
        debug!(kind = dispatcher.kind(), "closing transferred resource");
        dispatcher.close();
    }
}

/// `Err` if a wait on `signals` resolves right away against `state`.
pub(crate) fn immediate_outcome(
    state: HandleSignalsState,
    signals: HandleSignals,
) -> std::result::Result<(), WakeReason> {
    if state.satisfies(signals) {
        Err(WakeReason::Satisfied)
    } else if !state.can_satisfy(signals) {
        Err(WakeReason::Unsatisfiable)
    } else {
        Ok(())
    }
}
