//! Retry policy: retry budget and optional backoff delays.

use std::time::Duration;

/// Exponential backoff between a failure and its re-enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Growth factor per further retry.
    pub multiplier: f64,
}

/// Retry policy applied by the default exception handler.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt (2 means 3 attempts in total).
    pub retry_count: u32,

    /// `None` re-enqueues immediately.
    pub backoff: Option<Backoff>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: Self::DEFAULT_RETRY_COUNT,
            backoff: None,
        }
    }
}

impl RetryPolicy {
    pub const DEFAULT_RETRY_COUNT: u32 = 2;

    /// Upper bound for any single backoff delay.
    pub const MAX_DELAY: Duration = Duration::from_secs(60 * 60);

    pub fn new(retry_count: u32) -> Self {
        Self {
            retry_count,
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, base_delay: Duration, multiplier: f64) -> Self {
        self.backoff = Some(Backoff {
            base_delay,
            multiplier,
        });
        self
    }

    /// Whether a message that has already been retried `retry_attempts` times
    /// may be retried once more.
    pub fn should_retry(&self, retry_attempts: u32) -> bool {
        retry_attempts < self.retry_count
    }

    /// Delay before retry number `attempt` (1-indexed):
    /// `base_delay * multiplier^(attempt - 1)`, zero without backoff.
    ///
    /// With base_delay=2s, multiplier=2.0: 2s, 4s, 8s, ...
    ///
    /// Capped at `MAX_DELAY`. A negative or NaN product (bad multiplier)
    /// falls back to `base_delay`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let Some(backoff) = &self.backoff else {
            return Duration::ZERO;
        };
        let base_secs = backoff.base_delay.as_secs_f64();
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = base_secs * backoff.multiplier.powi(exponent);
        if secs.is_nan() || secs < 0.0 {
            return backoff.base_delay.min(Self::MAX_DELAY);
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(Self::MAX_DELAY)
            .min(Self::MAX_DELAY)
    }
}
