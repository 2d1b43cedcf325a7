use tokio::sync::broadcast;
use tracing::trace;

use courier_shared::ConnectionStatus;

use crate::config::MAX_EVENT_CAPACITY;

/// Notifications for the UI layer. They carry no list data: listeners
/// re-read the engine accessors they care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    MessagesChanged,
    SelectionChanged,
    LoadingChanged(bool),
    ConnectionChanged(ConnectionStatus),
    PollingChanged(bool),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.clamp(1, MAX_EVENT_CAPACITY));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        if let Err(e) = self.tx.send(event) {
            trace!(event = ?e.0, "No event listeners");
        }
    }
}
