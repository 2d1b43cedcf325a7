//! Real-time message synchronization for a chat conversation view.
//!
//! [`ChatSync`] keeps an ordered, duplicate-free message list in step with the
//! server through a push channel when one is connected and through polling
//! otherwise, sends messages optimistically with retries, and manages the
//! attachments selected for the next message.

pub mod attachments;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ports;
pub mod push;
pub mod retry;
mod send;
pub mod store;
mod transport;

pub use attachments::{
    mime_from_extension, AttachmentManager, FileId, LocalFile, MemoryPreviews, Preview,
    PreviewStore, SelectedFile, SelectedFileView, Selection,
};
pub use config::SyncConfig;
pub use engine::{ChatSync, SyncSnapshot};
pub use error::{ApiError, PushError, Result, SyncError};
pub use events::{EventBus, SyncEvent};
pub use ports::{
    CurrentUser, MessageQuery, ProgressFn, PushChannel, PushHandler, RemoteApi, SessionProvider,
    StaticSession,
};
pub use push::LocalPushChannel;
pub use retry::{PendingRetry, RetryDecision, RetryPolicy, RetryTracker};
pub use store::{MessageStore, Origin};
