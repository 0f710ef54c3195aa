use engine_core::EngineEvent;
use tokio::sync::{broadcast, mpsc};

use crate::command::EngineCommand;

/// Command/event channel pair between the façade handle and the engine task.
#[derive(Debug, Clone)]
pub(crate) struct EngineChannels {
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl EngineChannels {
    /// Create a new channel set and return it with the command receiver.
    pub(crate) fn new(event_buffer: usize) -> (Self, mpsc::UnboundedReceiver<EngineCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    pub(crate) fn command_sender(&self) -> mpsc::UnboundedSender<EngineCommand> {
        self.command_tx.clone()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<EngineEvent> {
        self.event_tx.clone()
    }
}
