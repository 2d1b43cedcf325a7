//! In-process push channel.
//!
//! [`LocalPushChannel`] keeps one handler per channel name and delivers
//! published events synchronously. Its connection state is set by the owner,
//! which makes it the push provider of choice for embedding the engine
//! without a realtime backend, and for exercising the transport logic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use courier_shared::{ConnectionState, ConnectionStatus, PushEvent};

use crate::error::PushError;
use crate::ports::{PushChannel, PushHandler};

pub struct LocalPushChannel {
    handlers: Mutex<HashMap<String, Arc<dyn PushHandler>>>,
    state: watch::Sender<ConnectionState>,
    /// When set, subscriptions fail with this reason.
    reject_reason: Mutex<Option<String>>,
}

impl LocalPushChannel {
    pub fn new(status: ConnectionStatus) -> Self {
        let (state, _) = watch::channel(ConnectionState::new(status));
        Self {
            handlers: Mutex::new(HashMap::new()),
            state,
            reject_reason: Mutex::new(None),
        }
    }

    /// A channel that never connects; the engine stays on polling.
    pub fn offline() -> Self {
        Self::new(ConnectionStatus::Disconnected)
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.set_state(ConnectionState::new(status));
    }

    pub fn set_state(&self, state: ConnectionState) {
        info!(status = %state.status, error = ?state.error, "Push connection state changed");
        self.state.send_replace(state);
    }

    pub fn reject_subscriptions(&self, reason: Option<String>) {
        *lock(&self.reject_reason) = reason;
    }

    /// Deliver `event` to the handler subscribed to `channel`. Returns
    /// whether anyone was listening.
    pub fn publish(&self, channel: &str, event: PushEvent) -> bool {
        let handler = lock(&self.handlers).get(channel).cloned();
        match handler {
            Some(handler) => {
                debug!(channel, event = event.name(), "Delivering push event");
                handler.on_event(event);
                true
            }
            None => {
                debug!(channel, event = event.name(), "No subscriber for push event");
                false
            }
        }
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        lock(&self.handlers).contains_key(channel)
    }

    /// Number of live receivers of the connection state.
    pub fn watcher_count(&self) -> usize {
        self.state.receiver_count()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut channels: Vec<String> = lock(&self.handlers).keys().cloned().collect();
        channels.sort();
        channels
    }
}

#[async_trait]
impl PushChannel for LocalPushChannel {
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn PushHandler>,
    ) -> Result<(), PushError> {
        if !self.state.borrow().status.is_connected() {
            return Err(PushError::Unavailable);
        }
        if let Some(reason) = lock(&self.reject_reason).clone() {
            return Err(PushError::Subscribe {
                channel: channel.to_string(),
                reason,
            });
        }
        lock(&self.handlers).insert(channel.to_string(), handler);
        debug!(channel, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) {
        if lock(&self.handlers).remove(channel).is_some() {
            debug!(channel, "Unsubscribed");
        }
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
