//! Truncated exponential backoff with jitter.
//!
//! Attempt `n` is the number of attempts already made, so `n = 1` yields the
//! delay before the first retry. Without jitter the delay is
//! `min(max_delay, base_delay * 2^(n-1))`; jitter then moves it uniformly by
//! up to `jitter_factor * delay` in either direction, clamped to
//! `[0, max_delay]`. A subscriber's `Retry-After` is a lower bound on the
//! result.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Longest `Retry-After` the engine will honor.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Retry policy for webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts (including initial attempt).
    pub max_attempts: u32,

    /// Base delay for exponential backoff calculation.
    pub base_delay: Duration,

    /// Maximum delay between retry attempts.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows attempt `attempt`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let multiplier = 2_u32.saturating_pow(exponent);
        let delay = self.base_delay.checked_mul(multiplier).unwrap_or(self.max_delay);

        std::cmp::min(delay, self.max_delay)
    }

    /// Jittered delay before the retry that follows attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jittered = apply_jitter(self.backoff(attempt), self.jitter_factor);

        std::cmp::min(jittered, self.max_delay)
    }
}

/// Retry decision context for a failed delivery attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempts made so far, including the one that just failed (1-based).
    pub attempt_number: u32,
    /// Error that caused the delivery failure.
    pub error: DeliveryError,
    /// Timestamp of the failed attempt.
    pub failed_at: DateTime<Utc>,
    /// Retry policy to apply.
    pub policy: RetryPolicy,
}

/// Result of retry decision calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the delivery at the specified time.
    Retry {
        /// When the next delivery attempt should be made
        next_attempt_at: DateTime<Utc>,
    },
    /// Do not retry - delivery permanently failed.
    GiveUp {
        /// Reason why the delivery should not be retried
        reason: String,
    },
}

impl RetryContext {
    /// Creates a new retry context for a failed delivery.
    pub fn new(
        attempt_number: u32,
        error: DeliveryError,
        failed_at: DateTime<Utc>,
        policy: RetryPolicy,
    ) -> Self {
        Self { attempt_number, error, failed_at, policy }
    }

    /// Determines if and when to retry.
    ///
    /// Explicit rejections give up regardless of budget. Retriable failures
    /// give up once `max_attempts` attempts have been made.
    pub fn decide_retry(&self) -> RetryDecision {
        if !self.error.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {}", self.error),
            };
        }

        if self.attempt_number >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!(
                    "maximum attempts ({}) exceeded: {}",
                    self.policy.max_attempts, self.error
                ),
            };
        }

        let delay = self.calculate_delay();
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp {
                reason: "retry delay duration out of range".to_string(),
            };
        };

        RetryDecision::Retry { next_attempt_at: self.failed_at + chrono_delay }
    }

    /// Backoff delay, raised to the subscriber's `Retry-After` if larger.
    fn calculate_delay(&self) -> Duration {
        let backoff = self.policy.delay_for(self.attempt_number);

        match self.error.retry_after_seconds() {
            Some(seconds) => {
                let requested = std::cmp::min(Duration::from_secs(seconds), MAX_RETRY_AFTER);
                std::cmp::max(backoff, requested)
            },
            None => backoff,
        }
    }
}

/// Randomizes a delay by up to `±jitter_factor` of itself.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}
