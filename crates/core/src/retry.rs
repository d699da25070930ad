//! Retry policy: exponential backoff with a ceiling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries)
    pub max_retries: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Delay before the attempt that follows the `retries`-th failure.
    ///
    /// `min(base * 2^retries, max_delay)`; overflow saturates at the cap.
    pub fn delay_for(&self, retries: u32) -> Duration {
        1u32.checked_shl(retries)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Check if another retry is allowed after `retries` retries so far.
    pub fn should_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }
}
