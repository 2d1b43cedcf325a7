//! Conversation data model exchanged with the remote message store.
//!
//! Every struct derives `Serialize` and `Deserialize` with camelCase field
//! names so the same types double as the JSON wire shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{EVENT_MESSAGE_READ, EVENT_MESSAGE_SENT};
use crate::types::{MessageId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned id, or a provisional id while the send is in flight.
    pub id: MessageId,
    /// Message text (may be empty when the message only carries files).
    pub message: String,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    /// Whether the sender is a support operator / administrator.
    #[serde(default)]
    pub is_privileged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<MessageAttachment>,
    /// Denormalized display info of the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderInfo>,
}

impl ChatMessage {
    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// File attached to a stored message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttachment {
    pub id: String,
    pub message_id: MessageId,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub is_image: bool,
    /// Download reference (URL or storage path).
    pub url: String,
}

/// Reference returned by the upload endpoint and echoed back when the
/// message referencing the file is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub path: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: u64,
}

// ---------------------------------------------------------------------------
// Requests / responses
// ---------------------------------------------------------------------------

/// One page of the message listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub items: Vec<ChatMessage>,
    #[serde(default)]
    pub has_next_page: bool,
}

/// Body of the create-message call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// Only set when a privileged operator writes to a specific user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

// ---------------------------------------------------------------------------
// Push events
// ---------------------------------------------------------------------------

/// Events delivered on a conversation's push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum PushEvent {
    #[serde(rename = "message.sent")]
    MessageSent(ChatMessage),
    #[serde(rename = "message.read", rename_all = "camelCase")]
    MessageRead {
        message_id: MessageId,
        read_at: DateTime<Utc>,
    },
}

impl PushEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSent(_) => EVENT_MESSAGE_SENT,
            Self::MessageRead { .. } => EVENT_MESSAGE_READ,
        }
    }
}
