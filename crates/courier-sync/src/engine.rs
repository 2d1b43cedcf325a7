//! The engine facade handed to the UI layer.
//!
//! [`ChatSync`] is a cheap, cloneable handle over [`Inner`], which owns the
//! message store, the attachment selection, the retry bookkeeping and the
//! transport handles. State lives behind short-lived synchronous locks that
//! are never held across an `.await`; continuations of network calls carry
//! the epoch they started in and are discarded once the conversation target
//! was switched or the engine shut down.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use courier_shared::constants::FIRST_PAGE;
use courier_shared::{ChatMessage, ConnectionState, ConnectionStatus, ConversationTarget};

use crate::attachments::{LocalFile, PreviewStore, Selection, SelectedFileView};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncEvent};
use crate::ports::{MessageQuery, PushChannel, RemoteApi, SessionProvider};
use crate::retry::RetryTracker;
use crate::store::MessageStore;
use crate::transport::Transport;

/// Mutable engine state guarded by [`Inner::state`].
#[derive(Debug)]
pub(crate) struct EngineState {
    pub(crate) store: MessageStore,
    /// Bumped on every target switch and on shutdown.
    pub(crate) epoch: u64,
    pub(crate) closed: bool,
    pub(crate) is_loading: bool,
    pub(crate) initial_loaded: bool,
    pub(crate) error: Option<SyncError>,
    pub(crate) connection: ConnectionState,
    pub(crate) is_polling: bool,
}

pub(crate) struct Inner {
    pub(crate) config: SyncConfig,
    pub(crate) api: Arc<dyn RemoteApi>,
    pub(crate) push: Arc<dyn PushChannel>,
    pub(crate) session: Arc<dyn SessionProvider>,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) selection: Selection,
    pub(crate) retries: Mutex<RetryTracker>,
    pub(crate) transport: tokio::sync::Mutex<Transport>,
    pub(crate) events: EventBus,
    /// Mirrors `EngineState::epoch` so sleeping tasks can wake on teardown.
    pub(crate) lifecycle: watch::Sender<u64>,
}

impl Inner {
    pub(crate) fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn retries(&self) -> MutexGuard<'_, RetryTracker> {
        self.retries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the live state; `None` once the engine is closed.
    pub(crate) fn with_live<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> Option<R> {
        let mut state = self.state();
        if state.closed {
            return None;
        }
        Some(f(&mut state))
    }

    /// Run `f` only if `epoch` is still the current one.
    pub(crate) fn with_epoch<R>(
        &self,
        epoch: u64,
        f: impl FnOnce(&mut EngineState) -> R,
    ) -> Option<R> {
        let mut state = self.state();
        if state.closed || state.epoch != epoch {
            return None;
        }
        Some(f(&mut state))
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.with_epoch(epoch, |_| ()).is_some()
    }

    /// Resolves once `epoch` is no longer current.
    pub(crate) async fn epoch_ended(&self, epoch: u64) {
        let mut rx = self.lifecycle.subscribe();
        // The sender lives as long as `self`, so this only errors on drop.
        let _ = rx.wait_for(|current| *current != epoch).await;
    }

    /// Start a new epoch with `f` applied to the state; returns the epoch.
    pub(crate) fn begin_epoch(&self, f: impl FnOnce(&mut EngineState)) -> u64 {
        let epoch = {
            let mut state = self.state();
            state.epoch += 1;
            f(&mut state);
            state.epoch
        };
        self.lifecycle.send_replace(epoch);
        epoch
    }

    pub(crate) fn surface_error(&self, epoch: u64, error: &SyncError) {
        if self
            .with_epoch(epoch, |s| s.error = Some(error.clone()))
            .is_some()
        {
            self.events.emit(SyncEvent::Error(error.to_string()));
        }
    }

    pub(crate) async fn load_initial(&self) -> Result<()> {
        let started = self
            .with_live(|s| {
                if s.is_loading {
                    return None;
                }
                s.is_loading = true;
                Some((s.epoch, s.store.target().clone()))
            })
            .flatten();
        let Some((epoch, target)) = started else {
            return Ok(());
        };
        self.events.emit(SyncEvent::LoadingChanged(true));

        debug!(conversation = %target, "Loading first page");
        let result = self
            .api
            .list_messages(&MessageQuery::page(target, FIRST_PAGE))
            .await;

        let outcome = self.with_epoch(epoch, |s| {
            s.is_loading = false;
            match result {
                Ok(page) => {
                    s.store.load_initial(page);
                    s.initial_loaded = true;
                    // A successful reload resolves an earlier fetch failure.
                    if matches!(s.error, Some(SyncError::Fetch(_))) {
                        s.error = None;
                    }
                    Ok(())
                }
                Err(e) => Err(SyncError::Fetch(e)),
            }
        });
        self.finish_load(epoch, outcome)
    }

    pub(crate) async fn load_older(&self) -> Result<()> {
        let started = self
            .with_live(|s| {
                if s.is_loading || !s.store.has_more() {
                    return None;
                }
                s.is_loading = true;
                Some((s.epoch, s.store.target().clone(), s.store.next_page()))
            })
            .flatten();
        let Some((epoch, target, page)) = started else {
            return Ok(());
        };
        self.events.emit(SyncEvent::LoadingChanged(true));

        debug!(conversation = %target, page, "Loading older messages");
        let result = self
            .api
            .list_messages(&MessageQuery::page(target, page))
            .await;

        let outcome = self.with_epoch(epoch, |s| {
            s.is_loading = false;
            match result {
                Ok(page) => {
                    s.store.prepend_older(page);
                    Ok(())
                }
                Err(e) => Err(SyncError::Fetch(e)),
            }
        });
        self.finish_load(epoch, outcome)
    }

    fn finish_load(&self, epoch: u64, outcome: Option<Result<()>>) -> Result<()> {
        match outcome {
            // Target switched or engine closed while fetching.
            None => Ok(()),
            Some(Ok(())) => {
                self.events.emit(SyncEvent::LoadingChanged(false));
                self.events.emit(SyncEvent::MessagesChanged);
                Ok(())
            }
            Some(Err(e)) => {
                self.events.emit(SyncEvent::LoadingChanged(false));
                self.surface_error(epoch, &e);
                Err(e)
            }
        }
    }

    /// Spawn the first-page fetch unless it already completed or is running.
    pub(crate) fn ensure_initial_load(self: &Arc<Self>) {
        let needed = self
            .with_live(|s| !s.initial_loaded && !s.is_loading)
            .unwrap_or(false);
        if needed {
            let inner = self.clone();
            tokio::spawn(async move {
                // Failures are already surfaced through `error`.
                let _ = inner.load_initial().await;
            });
        }
    }
}

/// Point-in-time copy of everything the UI renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub target: ConversationTarget,
    pub messages: Vec<ChatMessage>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub connection_status: ConnectionStatus,
    pub connection_error: Option<String>,
    pub is_polling: bool,
    pub has_more_messages: bool,
    pub last_message_timestamp: Option<DateTime<Utc>>,
    pub selected_files: Vec<SelectedFileView>,
}

/// Real-time message synchronization engine for one conversation view.
#[derive(Clone)]
pub struct ChatSync {
    inner: Arc<Inner>,
}

impl ChatSync {
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn RemoteApi>,
        push: Arc<dyn PushChannel>,
        session: Arc<dyn SessionProvider>,
        previews: Arc<dyn PreviewStore>,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let connection = push.connection().borrow().clone();
        let (lifecycle, _) = watch::channel(0);
        let inner = Inner {
            retries: Mutex::new(RetryTracker::new(config.retry)),
            selection: Selection::new(previews, events.clone()),
            state: Mutex::new(EngineState {
                store: MessageStore::new(ConversationTarget::Own),
                epoch: 0,
                closed: false,
                is_loading: false,
                initial_loaded: false,
                error: None,
                connection,
                is_polling: false,
            }),
            transport: tokio::sync::Mutex::new(Transport::default()),
            config,
            api,
            push,
            session,
            events,
            lifecycle,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Open `target` and follow the push channel's connection state.
    pub async fn start(&self, target: ConversationTarget) {
        info!(conversation = %target, "Starting chat sync");
        let connection = self.inner.push.connection();
        self.inner.switch_target(target).await;
        self.inner.spawn_watcher(connection).await;
    }

    /// Tear down the current conversation and open `target`.
    pub async fn set_target(&self, target: ConversationTarget) {
        self.inner.switch_target(target).await;
    }

    /// Stop all background work. Pending sends and fetches finish without
    /// touching state.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    pub async fn load_initial(&self) -> Result<()> {
        self.inner.load_initial().await
    }

    pub async fn load_more_messages(&self) -> Result<()> {
        self.inner.load_older().await
    }

    /// Send `text` (and `file`, or the pending selection) optimistically.
    /// Never fails: problems end up in [`ChatSync::error`].
    pub async fn send_message(&self, text: &str, file: Option<LocalFile>) {
        self.inner.send_message(text, file).await;
    }

    pub fn add_file(&self, file: LocalFile) {
        self.inner.selection.update(|m| m.add_file(file));
    }

    pub fn remove_file(&self, index: usize) -> Option<LocalFile> {
        self.inner.selection.update(|m| m.remove_file(index))
    }

    pub fn selected_files(&self) -> Vec<SelectedFileView> {
        self.inner.selection.read(|m| m.views())
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.state().store.messages().to_vec()
    }

    pub fn target(&self) -> ConversationTarget {
        self.inner.state().store.target().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state().is_loading
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state().error.as_ref().map(ToString::to_string)
    }

    pub fn clear_error(&self) {
        self.inner.state().error = None;
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.state().connection.status
    }

    pub fn connection_error(&self) -> Option<String> {
        self.inner.state().connection.error.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.state().is_polling
    }

    pub fn has_more_messages(&self) -> bool {
        self.inner.state().store.has_more()
    }

    pub fn last_message_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.state().store.last_message_timestamp()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let selected_files = self.selected_files();
        let state = self.inner.state();
        SyncSnapshot {
            target: state.store.target().clone(),
            messages: state.store.messages().to_vec(),
            is_loading: state.is_loading,
            error: state.error.as_ref().map(ToString::to_string),
            connection_status: state.connection.status,
            connection_error: state.connection.error.clone(),
            is_polling: state.is_polling,
            has_more_messages: state.store.has_more(),
            last_message_timestamp: state.store.last_message_timestamp(),
            selected_files,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }
}
