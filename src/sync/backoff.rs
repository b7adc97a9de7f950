use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::SyncConfig;

/// Exponential retry delay: `base * 2^(n-1)` after `n` consecutive failures,
/// never more than `cap`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.backoff_base, config.backoff_cap)
    }

    pub fn delay(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempts - 1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Earliest time a record with `attempts` failures may be retried.
    pub fn next_attempt_at(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if attempts == 0 {
            return None;
        }
        chrono::Duration::from_std(self.delay(attempts))
            .ok()
            .and_then(|d| now.checked_add_signed(d))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
