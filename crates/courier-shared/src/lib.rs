// Data model shared by the sync engine, the HTTP client and the CLI.

pub mod constants;
pub mod error;
pub mod models;
pub mod types;

pub use error::IdError;
pub use models::{
    AttachmentRef, ChatMessage, MessageAttachment, MessagePage, NewMessage, PushEvent, SenderInfo,
};
pub use types::{ConnectionState, ConnectionStatus, ConversationTarget, MessageId, UserId};
