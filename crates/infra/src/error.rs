//! Store and queue error types.

use thiserror::Error;

use resumeflow_core::{DomainError, JobUid, TaskId};

/// Backing-store failure (connection loss, command error).
///
/// These are transient from the queue's point of view: loops back off and try
/// again, they never surface to a task.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("wrong value type stored at key {0}")]
    WrongType(String),

    #[error("in-memory store state poisoned")]
    Poisoned,
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
        {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Queue operation error.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A record exists but cannot be decoded.
    #[error("malformed record at {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("job not found: {0}")]
    JobNotFound(JobUid),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl QueueError {
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueError::Store(StoreError::Connection(_) | StoreError::Command(_))
        )
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
