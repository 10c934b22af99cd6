//! Retry/backoff scheduling for external lookup failures
//!
//! Exponential backoff with a cap plus small jitter, so a flapping ledger
//! node is not hammered by every watched transfer at once. A transfer whose
//! consecutive failures exceed the ceiling is failed terminally rather than
//! retried forever.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Failure reason written when the retry ceiling is exceeded
pub const RETRIES_EXHAUSTED_REASON: &str = "external lookup exhausted retries";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_secs(config.base_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            max_retries: config.max_retries,
        }
    }

    /// Backoff delay before attempt `retry_count + 1`:
    /// `min(base * 2^retry_count, max_delay)` plus up to 10% jitter.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exp = retry_count.min(31);
        let uncapped = self
            .base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay);
        let capped = uncapped.min(self.max_delay);

        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 10);
        capped + Duration::from_millis(jitter_ms)
    }

    /// Next wakeup timestamp after a failure at `retry_count` prior failures
    pub fn next_retry_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = self.delay_for(retry_count);
        now + ChronoDuration::milliseconds(delay.as_millis() as i64)
    }

    /// A transfer at this failure count has exhausted its retries and must
    /// surface as a terminal, reportable failure.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count > self.max_retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
