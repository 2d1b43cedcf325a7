//! Push vs. polling coordination.
//!
//! While the push provider reports `connected`, the engine holds a
//! subscription to the conversation channel and nothing polls. In any other
//! state a recurring poller fetches messages newer than the watermark. The
//! two never run together, except when the subscription itself was rejected:
//! then polling stays on as the fallback although the provider is connected.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use courier_shared::{ChatMessage, ConnectionState, ConversationTarget, MessageId};

use crate::engine::Inner;
use crate::error::SyncError;
use crate::events::SyncEvent;
use crate::ports::{MessageQuery, PushHandler};
use crate::store::Origin;

/// Handles owned by the coordinator. Dropping it aborts the background tasks.
#[derive(Debug, Default)]
pub(crate) struct Transport {
    /// Channel currently subscribed to.
    channel: Option<String>,
    poller: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl Drop for Transport {
    fn drop(&mut self) {
        for handle in [self.poller.take(), self.watcher.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

/// Push handler bound to one conversation epoch.
struct ConversationHandler {
    inner: Weak<Inner>,
    epoch: u64,
}

impl PushHandler for ConversationHandler {
    fn on_message_sent(&self, message: ChatMessage) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let id = message.id.clone();
        match inner.with_epoch(self.epoch, |s| s.store.merge_incoming([message], Origin::Push)) {
            Some(added) if added > 0 => {
                debug!(msg_id = %id, "Pushed message merged");
                inner.events.emit(SyncEvent::MessagesChanged);
            }
            Some(_) => debug!(msg_id = %id, "Pushed message already known"),
            None => debug!(msg_id = %id, "Dropping push event for a stale conversation"),
        }
    }

    fn on_message_read(&self, message_id: MessageId, read_at: DateTime<Utc>) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let applied = inner
            .with_epoch(self.epoch, |s| s.store.apply_read_receipt(&message_id, read_at))
            .unwrap_or(false);
        if applied {
            inner.events.emit(SyncEvent::MessagesChanged);
        } else {
            debug!(msg_id = %message_id, "Read receipt for unknown message ignored");
        }
    }
}

impl Inner {
    /// Follow the provider's connection state until shutdown.
    pub(crate) async fn spawn_watcher(self: &Arc<Self>, mut connection: watch::Receiver<ConnectionState>) {
        // Shutdown closes the engine under this lock.
        let mut transport = self.transport.lock().await;
        if self.state().closed {
            debug!("Engine closed, not watching the connection");
            return;
        }

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while connection.changed().await.is_ok() {
                let state = connection.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_connection_change(state).await;
            }
            debug!("Connection watcher stopped");
        });

        if let Some(previous) = transport.watcher.replace(handle) {
            previous.abort();
        }
    }

    async fn on_connection_change(self: &Arc<Self>, state: ConnectionState) {
        let mut transport = self.transport.lock().await;
        self.apply_connection(&mut transport, state).await;
    }

    /// Reconcile subscription and poller with `state`. Idempotent.
    async fn apply_connection(self: &Arc<Self>, transport: &mut Transport, state: ConnectionState) {
        let status = state.status;
        let changed = self.with_live(|s| {
            let changed = s.connection.status != status;
            s.connection = state;
            (changed, s.epoch)
        });
        let Some((changed, epoch)) = changed else {
            return;
        };
        if changed {
            info!(status = %status, "Connection status changed");
            self.events.emit(SyncEvent::ConnectionChanged(status));
        }

        if status.is_connected() {
            match self.subscribe(transport, epoch).await {
                Ok(()) => self.stop_polling(transport),
                Err(e) => {
                    warn!(error = %e, "Subscription failed, falling back to polling");
                    self.surface_error(epoch, &e);
                    self.start_polling(transport, epoch);
                }
            }
        } else {
            self.unsubscribe(transport).await;
            self.start_polling(transport, epoch);
        }
        self.ensure_initial_load();
    }

    async fn subscribe(
        self: &Arc<Self>,
        transport: &mut Transport,
        epoch: u64,
    ) -> Result<(), SyncError> {
        let Some(target) = self.with_epoch(epoch, |s| s.store.target().clone()) else {
            return Ok(());
        };
        let user = self
            .session
            .current_user()
            .ok_or(SyncError::NotAuthenticated)?;
        let channel = target.channel_name(&user.id);
        if transport.channel.as_deref() == Some(channel.as_str()) {
            return Ok(());
        }
        self.unsubscribe(transport).await;

        let handler = Arc::new(ConversationHandler {
            inner: Arc::downgrade(self),
            epoch,
        });
        self.push.subscribe(&channel, handler).await?;
        info!(channel = %channel, "Subscribed to conversation channel");
        transport.channel = Some(channel);
        Ok(())
    }

    async fn unsubscribe(&self, transport: &mut Transport) {
        if let Some(channel) = transport.channel.take() {
            self.push.unsubscribe(&channel).await;
            info!(channel = %channel, "Unsubscribed from conversation channel");
        }
    }

    fn start_polling(self: &Arc<Self>, transport: &mut Transport, epoch: u64) {
        if transport.poller.is_some() {
            return;
        }
        let period = self.config.poll_interval;
        let weak = Arc::downgrade(self);
        transport.poller = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.poll_once(epoch).await {
                    break;
                }
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "Polling started");
        self.set_polling(true);
    }

    fn stop_polling(&self, transport: &mut Transport) {
        if let Some(poller) = transport.poller.take() {
            poller.abort();
            info!("Polling stopped");
            self.set_polling(false);
        }
    }

    fn set_polling(&self, polling: bool) {
        let changed = self
            .with_live(|s| std::mem::replace(&mut s.is_polling, polling) != polling)
            .unwrap_or(false);
        if changed {
            self.events.emit(SyncEvent::PollingChanged(polling));
        }
    }

    /// One poll cycle. Returns `false` once the epoch is over.
    async fn poll_once(&self, epoch: u64) -> bool {
        let Some((target, after)) = self.with_epoch(epoch, |s| {
            (s.store.target().clone(), s.store.last_message_timestamp())
        }) else {
            return false;
        };

        match self.api.list_messages(&MessageQuery::since(target, after)).await {
            Ok(page) => {
                let count = page.items.len();
                match self.with_epoch(epoch, |s| s.store.merge_incoming(page.items, Origin::Poll)) {
                    None => return false,
                    Some(added) if added > 0 => {
                        debug!(fetched = count, added, "Poll merged new messages");
                        self.events.emit(SyncEvent::MessagesChanged);
                    }
                    Some(_) => {}
                }
            }
            // Transient; the next tick tries again.
            Err(e) => warn!(error = %SyncError::Poll(e), "Poll failed"),
        }
        true
    }

    /// Drop subscription and poller, reset per-target state and reapply the
    /// current connection state for `target`.
    pub(crate) async fn switch_target(self: &Arc<Self>, target: ConversationTarget) {
        let mut transport = self.transport.lock().await;
        self.unsubscribe(&mut transport).await;
        self.stop_polling(&mut transport);

        let closed = self.state().closed;
        if closed {
            debug!(conversation = %target, "Ignoring target switch after shutdown");
            return;
        }
        info!(conversation = %target, "Switching conversation");
        self.begin_epoch(|s| {
            s.store.reset(target);
            s.initial_loaded = false;
            s.is_loading = false;
            s.error = None;
        });
        self.retries().clear_all();
        self.events.emit(SyncEvent::MessagesChanged);

        let state = self.push.connection().borrow().clone();
        self.apply_connection(&mut transport, state).await;
    }

    pub(crate) async fn shutdown(&self) {
        let mut transport = self.transport.lock().await;
        if let Some(watcher) = transport.watcher.take() {
            watcher.abort();
        }
        self.unsubscribe(&mut transport).await;
        self.stop_polling(&mut transport);

        self.begin_epoch(|s| {
            s.closed = true;
            s.is_loading = false;
        });
        self.retries().clear_all();
        self.selection.update(|m| m.clear());
        info!("Chat sync shut down");
    }
}
