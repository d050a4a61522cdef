//! Retry logic for daemon RPC calls

use crate::error::Result;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts for general RPC before giving up
const GENERAL_MAX_ATTEMPTS: usize = 8;

/// First backoff step for general RPC
const GENERAL_BASE_DELAY: Duration = Duration::from_millis(250);

/// Backoff ceiling for general RPC
const GENERAL_MAX_DELAY: Duration = Duration::from_secs(4);

/// Retry policy with exponential backoff.
///
/// Each attempt's delay is derived from the attempt number rather than
/// accumulated, and gets a multiplicative spread so a fleet of pools does
/// not hammer a recovering daemon in lockstep.
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: GENERAL_MAX_ATTEMPTS,
            base_delay: GENERAL_BASE_DELAY,
            max_delay: GENERAL_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom parameters
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Policy for block submission: three attempts, flat 500 ms apart.
    /// A block that cannot be placed within that window has lost the race
    /// anyway.
    pub fn submission() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(500),
        }
    }

    /// Delay before the retry following failed attempt `attempt`
    /// (1-based): base * 2^(attempt-1), capped, then spread by ±15%.
    fn backoff_delay(&self, attempt: usize) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16) as u32;
        let stepped = self
            .base_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay);
        let spread = 0.85 + rand::random::<f64>() * 0.30;
        stepped.mul_f64(spread)
    }

    /// Execute `operation` under this policy. Only errors classified as
    /// retryable are attempted again.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0usize;
        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            attempt += 1;
            if !error.should_retry() {
                debug!(error = %error, "non-retryable error");
                return Err(error);
            }
            if attempt >= self.max_attempts {
                warn!(attempts = attempt, error = %error, "giving up after final attempt");
                return Err(error);
            }

            let delay = self.backoff_delay(attempt);
            warn!(attempt, error = %error, delay = ?delay, "operation failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}
