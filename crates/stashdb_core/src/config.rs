//! Storage configuration.

use std::time::Duration;

/// Configuration of a [`crate::Storage`] instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Total attempts per single-shot operation, first one included.
    pub retry_attempts: u32,

    /// Fixed wait between attempts.
    pub retry_delay: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl StorageConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A single attempt per operation.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            retry_attempts: 1,
            retry_delay: Duration::ZERO,
        }
    }

    /// Sets the total number of attempts. Values below 1 are treated as 1.
    #[must_use]
    pub const fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Sets the wait between attempts.
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}
