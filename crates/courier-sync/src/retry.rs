//! Retry bookkeeping for failed sends.
//!
//! Each provisional message whose send failed has a [`PendingRetry`] entry
//! holding its retry count and the earliest time the next attempt may run.
//! Entries are created on the first failure, bumped on every retry and
//! removed on success or once the budget is exhausted.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use courier_shared::MessageId;

/// Retry budget and exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every further retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `retry` (zero-based): `base × 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRetry {
    /// Retries scheduled so far.
    pub attempts: u32,
    pub next_attempt_at: Instant,
}

#[derive(Debug)]
pub struct RetryTracker {
    policy: RetryPolicy,
    pending: HashMap<MessageId, PendingRetry>,
}

impl RetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pending: HashMap::new(),
        }
    }

    /// Record a failed attempt for `id` and decide whether to try again.
    pub fn record_failure(&mut self, id: &MessageId) -> RetryDecision {
        let attempts = self.attempts(id);
        if attempts >= self.policy.max_retries {
            self.pending.remove(id);
            return RetryDecision::GiveUp;
        }

        let delay = self.policy.delay_for(attempts);
        self.pending.insert(
            id.clone(),
            PendingRetry {
                attempts: attempts + 1,
                next_attempt_at: Instant::now() + delay,
            },
        );
        RetryDecision::RetryAfter(delay)
    }

    pub fn attempts(&self, id: &MessageId) -> u32 {
        self.pending.get(id).map_or(0, |p| p.attempts)
    }

    pub fn get(&self, id: &MessageId) -> Option<&PendingRetry> {
        self.pending.get(id)
    }

    /// Forget `id` (successful send or abandoned).
    pub fn clear(&mut self, id: &MessageId) {
        self.pending.remove(id);
    }

    pub fn clear_all(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
