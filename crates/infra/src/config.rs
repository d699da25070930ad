//! Queue configuration.

use std::time::Duration;

use resumeflow_core::RetryPolicy;

use crate::keys::KeySpace;

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Record lifetimes and retry policy shared by every queue component.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Key namespace
    pub keys: KeySpace,
    /// Task record TTL while queued or running
    pub job_timeout: Duration,
    /// Task record TTL after completion
    pub completed_ttl: Duration,
    /// Task record TTL after permanent failure (audit window)
    pub failed_ttl: Duration,
    /// Job record TTL
    pub job_retention: Duration,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            keys: KeySpace::default(),
            job_timeout: HOUR,
            completed_ttl: HOUR,
            failed_ttl: 7 * DAY,
            job_retention: 7 * DAY,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.keys = KeySpace::new(prefix);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = retention;
        self
    }
}
