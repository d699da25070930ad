//! Deferred deletion of a finished job's external resources.
//!
//! Resources live in independent stores (uploaded files, graph nodes, vector
//! rows). Each is reached through a [`ResourceCleaner`]; the pump attempts all
//! of them for every due entry and a failure in one never skips the others.

use std::time::Duration;

use thiserror::Error;

use resumeflow_core::JobUid;

pub mod files;
pub mod http;
mod pump;

pub use files::LocalFileStore;
pub use http::HttpResourceCleaner;
pub use pump::{CleanupPump, CleanupReport, SweepError};

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("file store error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{target} answered {status}")]
    Status { target: String, status: u16 },
}

/// One external store holding per-job resources.
#[async_trait::async_trait]
pub trait ResourceCleaner: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Delete everything stored for `job_uid`. Deleting nothing is success.
    async fn delete_job_resources(&self, job_uid: &JobUid) -> Result<(), CleanupError>;
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// How often due entries are executed
    pub interval: Duration,
    /// How often durable storage is swept for orphans
    pub sweep_interval: Duration,
    /// Minimum age of an orphaned upload before the sweep deletes it
    pub retention: Duration,
    /// Executions of a partially failing entry before it is dropped
    pub max_attempts: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: MINUTE,
            sweep_interval: 60 * MINUTE,
            retention: 7 * DAY,
            max_attempts: 5,
        }
    }
}
