//! Collaborator seams of the engine.
//!
//! The engine never talks to the network directly: reads and writes go
//! through [`RemoteApi`], live delivery through [`PushChannel`], and the
//! signed-in user comes from a [`SessionProvider`].

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use courier_shared::constants::FIRST_PAGE;
use courier_shared::{
    AttachmentRef, ChatMessage, ConnectionState, ConversationTarget, MessageId, MessagePage,
    NewMessage, PushEvent, SenderInfo, UserId,
};

use crate::attachments::LocalFile;
use crate::error::{ApiError, PushError};

/// Upload progress callback: `(bytes_sent, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Parameters of a message listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub target: ConversationTarget,
    pub page: u32,
    /// Only return messages created after this instant (used by polling).
    pub after: Option<DateTime<Utc>>,
}

impl MessageQuery {
    pub fn page(target: ConversationTarget, page: u32) -> Self {
        Self {
            target,
            page,
            after: None,
        }
    }

    pub fn since(target: ConversationTarget, after: Option<DateTime<Utc>>) -> Self {
        Self {
            target,
            page: FIRST_PAGE,
            after,
        }
    }
}

/// Remote message store.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_messages(&self, query: &MessageQuery) -> Result<MessagePage, ApiError>;

    /// Store a message; returns the canonical server copy.
    async fn create_message(&self, message: &NewMessage) -> Result<ChatMessage, ApiError>;

    async fn upload_attachment(
        &self,
        file: &LocalFile,
        progress: ProgressFn,
    ) -> Result<AttachmentRef, ApiError>;
}

/// Handlers invoked by a push channel for one subscription.
pub trait PushHandler: Send + Sync {
    fn on_message_sent(&self, message: ChatMessage);

    fn on_message_read(&self, message_id: MessageId, read_at: DateTime<Utc>);

    fn on_event(&self, event: PushEvent) {
        match event {
            PushEvent::MessageSent(message) => self.on_message_sent(message),
            PushEvent::MessageRead {
                message_id,
                read_at,
            } => self.on_message_read(message_id, read_at),
        }
    }
}

/// Subscription-based delivery of server events.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn subscribe(&self, channel: &str, handler: Arc<dyn PushHandler>)
        -> Result<(), PushError>;

    async fn unsubscribe(&self, channel: &str);

    /// Observable connection state of the provider.
    fn connection(&self) -> watch::Receiver<ConnectionState>;
}

/// The signed-in user, as needed to build optimistic messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
    /// Support operator / administrator.
    pub is_privileged: bool,
}

impl CurrentUser {
    pub fn sender_info(&self) -> SenderInfo {
        SenderInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<CurrentUser>;
}

/// Session whose user is set explicitly (CLI, tests).
#[derive(Debug, Default)]
pub struct StaticSession {
    user: RwLock<Option<CurrentUser>>,
}

impl StaticSession {
    pub fn new(user: CurrentUser) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn set_user(&self, user: Option<CurrentUser>) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = user;
    }
}

impl SessionProvider for StaticSession {
    fn current_user(&self) -> Option<CurrentUser> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
