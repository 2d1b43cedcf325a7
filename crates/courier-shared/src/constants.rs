use std::time::Duration;

/// Prefix marking a locally generated, not yet confirmed message id.
pub const PROVISIONAL_ID_PREFIX: &str = "temp-";

/// Prefix of the per-user push channel name.
pub const CHANNEL_PREFIX: &str = "chat.";

/// Push event fired when a message is stored server-side.
pub const EVENT_MESSAGE_SENT: &str = "message.sent";

/// Push event fired when the recipient reads a message.
pub const EVENT_MESSAGE_READ: &str = "message.read";

/// Interval between polls while the push channel is not connected.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Number of automatic retries for a failed send before it is abandoned.
pub const MAX_SEND_RETRIES: u32 = 3;

/// Base delay of the send retry backoff (doubled on every retry).
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);

/// First page index of the paginated message listing.
pub const FIRST_PAGE: u32 = 1;

/// Maximum attachment size in bytes (20 MiB)
pub const MAX_FILE_SIZE: usize = 20 * 1024 * 1024;

/// Upload body chunk size used for progress reporting (64 KiB)
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;
