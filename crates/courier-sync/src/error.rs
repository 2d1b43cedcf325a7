use thiserror::Error;

/// Failure reported by the remote message API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),
}

/// Failure reported by the push-channel provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("Subscription to {channel} failed: {reason}")]
    Subscribe { channel: String, reason: String },

    #[error("Push channel unavailable")]
    Unavailable,
}

/// Errors produced by the synchronization engine.
///
/// Which of these reach the user is decided by the engine: poll failures are
/// only logged, send failures only after the retry budget is spent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Failed to load messages: {0}")]
    Fetch(#[source] ApiError),

    #[error("Polling failed: {0}")]
    Poll(#[source] ApiError),

    #[error("Live updates unavailable: {0}")]
    Subscription(#[from] PushError),

    #[error("Failed to send message: {0}")]
    Send(#[source] ApiError),

    #[error("Failed to upload {file_name}: {source}")]
    Upload {
        file_name: String,
        #[source]
        source: ApiError,
    },

    #[error("File error: {0}")]
    File(String),

    #[error("Not signed in")]
    NotAuthenticated,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
