//! Bounded retry of single-shot operations.

use crate::config::StorageConfig;
use crate::error::StoreResult;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed-delay, bounded retry.
///
/// An attempt that fails with a retryable error (see
/// [`crate::StoreError::is_retryable`]) is repeated after `delay` while
/// attempts remain. Any other error, or the last retryable one, is
/// returned as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy. `attempts` counts the first try and is at least 1.
    #[must_use]
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// A policy that tries once.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Builds the policy described by a storage config.
    #[must_use]
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_delay)
    }

    /// Total attempts.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wait between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `attempt` until it succeeds, fails for good, or attempts run out.
    ///
    /// `operation` only labels log events.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut tried = 1;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && tried < self.attempts => {
                    debug!(operation, attempt = tried, error = %e, "retrying");
                    tokio::time::sleep(self.delay).await;
                    tried += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(operation, attempts = tried, error = %e, "retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}
