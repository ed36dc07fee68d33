//! Retry policy: bounded attempts with capped exponential backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first. 1 disables retrying.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Scale each delay by a random factor in [0.7, 1.3].
    pub jitter: bool,
    /// Per-attempt timeout; `None` lets an attempt run as long as it likes.
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
            jitter: false,
            attempt_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::NotPositive { field: "retry.max_attempts", value: 0.0 });
        }
        ValidationError::check_range("retry.multiplier", self.multiplier, 1.0, 100.0)?;
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ValidationError::Inconsistent(format!(
                "retry.max_backoff_ms ({}) must be >= retry.initial_backoff_ms ({})",
                self.max_backoff_ms, self.initial_backoff_ms
            )));
        }
        if self.attempt_timeout_ms == Some(0) {
            return Err(ValidationError::NotPositive { field: "retry.attempt_timeout_ms", value: 0.0 });
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let raw = self.initial_backoff_ms as f64 * self.multiplier.powi(exp);
        let mut ms = raw.min(self.max_backoff_ms as f64);
        if self.jitter {
            ms *= rand::thread_rng().gen_range(0.7..=1.3);
        }
        Duration::from_millis(ms.max(0.0) as u64)
    }
}
