//! Retry policy for retryable unit failures.
//!
//! Exponential backoff with a hard attempt ceiling.

use chrono::{DateTime, Duration, Utc};

use crate::config::RecoveryConfig;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts allowed before a unit is failed permanently.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in seconds.
    pub base_delay_secs: u64,
    /// Cap for exponential growth, in seconds.
    pub max_delay_secs: u64,
    /// Multiplier applied per additional attempt.
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_secs: config.base_delay_secs,
            max_delay_secs: config.max_delay_secs,
            multiplier: config.multiplier,
        }
    }

    /// Whether a unit that has now made `attempts` attempts may try again.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Backoff after the `attempts`-th failed attempt:
    /// `base * multiplier^(attempts - 1)`, capped at `max_delay_secs`.
    pub fn backoff_secs(&self, attempts: u32) -> u64 {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let backoff = self.base_delay_secs as f64 * self.multiplier.powi(exponent);
        backoff.min(self.max_delay_secs as f64) as u64
    }

    /// When a unit that failed its `attempts`-th attempt at `now` becomes eligible again.
    pub fn retry_at(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.backoff_secs(attempts).min(i64::MAX as u64) as i64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RecoveryConfig::default())
    }
}
