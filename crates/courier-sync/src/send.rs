//! Optimistic send pipeline.
//!
//! A send shows up in the list immediately as a provisional message. Its
//! attachments are uploaded, the message is posted, and the provisional
//! entry is swapped for the server copy. Failed attempts are retried with
//! exponential backoff under the same provisional id; once the retry budget
//! is spent the entry is removed and a single error is surfaced.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use courier_shared::{AttachmentRef, ChatMessage, MessageId, NewMessage, UserId};

use crate::attachments::{upload_all, LocalFile};
use crate::engine::Inner;
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::ports::CurrentUser;
use crate::retry::RetryDecision;

/// Optimistic copy of an outgoing message, shown until the server answers.
fn provisional_message(user: &CurrentUser, text: &str, receiver: Option<UserId>) -> ChatMessage {
    ChatMessage {
        id: MessageId::provisional(),
        message: text.to_string(),
        sender_id: user.id.clone(),
        receiver_id: receiver,
        is_privileged: user.is_privileged,
        read_at: None,
        created_at: Utc::now(),
        attachments: Vec::new(),
        sender: Some(user.sender_info()),
    }
}

/// What one attempt sends.
struct Outgoing {
    text: String,
    receiver: Option<UserId>,
    files: Vec<LocalFile>,
    /// Files were taken from the selection, which is cleared after the
    /// first upload.
    from_selection: bool,
}

impl Inner {
    pub(crate) async fn send_message(self: &Arc<Self>, text: &str, file: Option<LocalFile>) {
        let Some(user) = self.session.current_user() else {
            debug!("Ignoring send without a signed-in user");
            return;
        };
        let text = text.trim();
        let has_selection = self.selection.read(|m| !m.is_empty());
        if text.is_empty() && file.is_none() && !has_selection {
            return;
        }

        let Some((epoch, target)) = self.with_live(|s| (s.epoch, s.store.target().clone())) else {
            return;
        };
        // Only privileged senders address a specific conversation.
        let receiver = if user.is_privileged {
            target.counterpart().cloned()
        } else {
            None
        };

        let provisional = provisional_message(&user, text, receiver.clone());
        let temp_id = provisional.id.clone();
        if self
            .with_epoch(epoch, |s| s.store.push_provisional(provisional))
            .is_none()
        {
            return;
        }
        self.events.emit(SyncEvent::MessagesChanged);
        info!(temp_id = %temp_id, conversation = %target, "Sending message");

        let (files, from_selection) = match file {
            Some(file) => (vec![file], false),
            None => (self.selection.update(|m| m.begin_upload()), true),
        };
        let mut outgoing = Outgoing {
            text: text.to_string(),
            receiver,
            files,
            from_selection,
        };

        loop {
            let error = match self.attempt(&mut outgoing).await {
                Ok(confirmed) => {
                    self.confirm(epoch, &temp_id, confirmed);
                    return;
                }
                Err(e) => e,
            };
            if !self.is_current(epoch) {
                debug!(temp_id = %temp_id, "Conversation closed, dropping failed send");
                self.retries().clear(&temp_id);
                return;
            }

            let decision = self.retries().record_failure(&temp_id);
            match decision {
                RetryDecision::RetryAfter(delay) => {
                    let (attempt, wake_at) = self
                        .retries()
                        .get(&temp_id)
                        .map_or((0, Instant::now() + delay), |p| (p.attempts, p.next_attempt_at));
                    warn!(
                        temp_id = %temp_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Send failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep_until(wake_at) => {}
                        _ = self.epoch_ended(epoch) => {
                            debug!(temp_id = %temp_id, "Retry cancelled");
                            self.retries().clear(&temp_id);
                            return;
                        }
                    }
                }
                RetryDecision::GiveUp => {
                    self.abandon(epoch, &temp_id, error);
                    return;
                }
            }
        }
    }

    /// Upload attachments (if any) and post the message once.
    async fn attempt(&self, outgoing: &mut Outgoing) -> Result<ChatMessage> {
        let uploaded = if outgoing.files.is_empty() {
            Ok(Vec::<AttachmentRef>::new())
        } else {
            upload_all(self.api.as_ref(), &self.selection, &outgoing.files).await
        };
        if outgoing.from_selection {
            // Selection is cleared after the first upload whatever happened.
            self.selection.update(|m| m.clear());
            outgoing.from_selection = false;
        }

        let message = NewMessage {
            receiver_id: outgoing.receiver.clone(),
            message: outgoing.text.clone(),
            attachments: uploaded?,
        };
        self.api
            .create_message(&message)
            .await
            .map_err(SyncError::Send)
    }

    fn confirm(&self, epoch: u64, temp_id: &MessageId, confirmed: ChatMessage) {
        self.retries().clear(temp_id);
        let msg_id = confirmed.id.clone();
        let created_at = confirmed.created_at;
        let applied = self.with_epoch(epoch, |s| {
            s.store.replace_provisional(temp_id, confirmed);
            s.store.advance_watermark(created_at);
        });
        if applied.is_some() {
            info!(temp_id = %temp_id, msg_id = %msg_id, "Message sent");
            self.events.emit(SyncEvent::MessagesChanged);
        } else {
            debug!(msg_id = %msg_id, "Message sent after the conversation closed");
        }
    }

    fn abandon(&self, epoch: u64, temp_id: &MessageId, cause: SyncError) {
        self.retries().clear(temp_id);
        error!(temp_id = %temp_id, error = %cause, "Giving up on message");
        let removed = self
            .with_epoch(epoch, |s| s.store.drop_provisional(temp_id))
            .unwrap_or(false);
        if removed {
            self.events.emit(SyncEvent::MessagesChanged);
        }
        self.surface_error(epoch, &cause);
    }
}
