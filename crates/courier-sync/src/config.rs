//! Engine configuration loaded from environment variables.
//!
//! All settings have defaults matching the production behaviour, so the
//! engine runs with zero configuration.

use std::time::Duration;

use courier_shared::constants::{MAX_SEND_RETRIES, POLL_INTERVAL, RETRY_BASE_DELAY};

use crate::retry::RetryPolicy;

/// Largest accepted `COURIER_EVENT_CAPACITY`.
pub const MAX_EVENT_CAPACITY: usize = 65_536;

/// Synchronization engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Interval of the polling fallback while the push channel is down.
    /// Env: `COURIER_POLL_INTERVAL_MS`
    /// Default: 5000
    pub poll_interval: Duration,

    /// Retry budget and backoff of failed sends.
    /// Env: `COURIER_MAX_SEND_RETRIES` (default 3), `COURIER_RETRY_BASE_MS` (default 1000)
    pub retry: RetryPolicy,

    /// Buffer size of the UI event broadcast channel.
    /// Env: `COURIER_EVENT_CAPACITY`
    /// Default: 256
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            retry: RetryPolicy::new(MAX_SEND_RETRIES, RETRY_BASE_DELAY),
            event_capacity: 256,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = parse_var(&lookup, "COURIER_POLL_INTERVAL_MS") {
            if ms == 0 {
                tracing::warn!("COURIER_POLL_INTERVAL_MS must be positive, using default");
            } else {
                config.poll_interval = Duration::from_millis(ms);
            }
        }

        if let Some(n) = parse_var(&lookup, "COURIER_MAX_SEND_RETRIES") {
            config.retry.max_retries = n.min(u32::MAX as u64) as u32;
        }

        if let Some(ms) = parse_var(&lookup, "COURIER_RETRY_BASE_MS") {
            config.retry.base_delay = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var(&lookup, "COURIER_EVENT_CAPACITY") {
            match usize::try_from(n) {
                Ok(n) if (1..=MAX_EVENT_CAPACITY).contains(&n) => config.event_capacity = n,
                _ => tracing::warn!(
                    value = n,
                    max = MAX_EVENT_CAPACITY,
                    "COURIER_EVENT_CAPACITY out of range, using default"
                ),
            }
        }

        config
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let value = lookup(key)?;
    match value.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %value, "Invalid numeric setting, using default");
            None
        }
    }
}
