//! Retry policy for confirmation emails that failed to send.
//!
//! Implements exponential backoff keyed on the attempt count recorded after
//! the failure: the n-th consecutive failure waits `base * multiplier^n`.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay in seconds.
    pub base_backoff_secs: u64,
    /// Upper bound for a single delay.
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Backoff in seconds after `attempts` recorded failures.
    pub fn backoff_secs(&self, attempts: i32) -> u64 {
        let backoff = self.base_backoff_secs as f64 * self.backoff_multiplier.powi(attempts);
        (backoff.min(self.max_backoff_secs as f64)) as u64
    }

    /// When a task that failed at `failed_at` becomes eligible again.
    pub fn next_eligible_at(&self, failed_at: DateTime<Utc>, attempts: i32) -> DateTime<Utc> {
        failed_at + Duration::seconds(self.backoff_secs(attempts) as i64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff_secs: 60,
            max_backoff_secs: 86400, // 24 hours
            backoff_multiplier: 2.0,
        }
    }
}
