//! Deferred external-resource deletion intents (`queue:cleanup` list).
//!
//! Entries are JSON documents. They are scanned in place rather than popped:
//! an entry is only removed once its deletion has been carried out, so a
//! crashed pump loses nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use resumeflow_core::JobUid;

use crate::backend::Backend;
use crate::error::QueueResult;
use crate::keys::KeySpace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupEntry {
    pub job_uid: JobUid,
    /// Earliest time the resources may be deleted
    pub cleanup_time: DateTime<Utc>,
    /// Previous partially failed executions
    #[serde(default)]
    pub attempts: u32,
}

impl CleanupEntry {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.cleanup_time <= now
    }
}

/// An entry together with its stored encoding, which identifies it for removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCleanup {
    raw: String,
    pub entry: CleanupEntry,
}

#[derive(Debug, Clone)]
pub struct CleanupQueue {
    backend: Arc<dyn Backend>,
    key: String,
}

impl CleanupQueue {
    pub fn new(backend: Arc<dyn Backend>, keys: &KeySpace) -> Self {
        Self {
            backend,
            key: keys.cleanup(),
        }
    }

    pub async fn schedule(
        &self,
        job_uid: &JobUid,
        cleanup_time: DateTime<Utc>,
    ) -> QueueResult<CleanupEntry> {
        let entry = CleanupEntry {
            job_uid: job_uid.clone(),
            cleanup_time,
            attempts: 0,
        };
        self.push(&entry).await?;
        debug!(job_uid = %job_uid, %cleanup_time, "cleanup scheduled");
        Ok(entry)
    }

    async fn push(&self, entry: &CleanupEntry) -> QueueResult<()> {
        let raw = serde_json::to_string(entry)?;
        self.backend.rpush(&self.key, &raw).await?;
        Ok(())
    }

    /// Every decodable entry, oldest first. Undecodable entries are removed.
    pub async fn pending(&self) -> QueueResult<Vec<PendingCleanup>> {
        let mut pending = Vec::new();
        for raw in self.backend.lrange(&self.key).await? {
            match serde_json::from_str::<CleanupEntry>(&raw) {
                Ok(entry) => pending.push(PendingCleanup { raw, entry }),
                Err(e) => {
                    warn!(raw = %raw, error = %e, "dropping malformed cleanup entry");
                    self.backend.lrem(&self.key, &raw).await?;
                }
            }
        }
        Ok(pending)
    }

    pub async fn due(&self, now: DateTime<Utc>) -> QueueResult<Vec<PendingCleanup>> {
        let mut pending = self.pending().await?;
        pending.retain(|p| p.entry.is_due(now));
        Ok(pending)
    }

    /// Remove an executed entry; `false` if it was already gone.
    pub async fn complete(&self, pending: &PendingCleanup) -> QueueResult<bool> {
        Ok(self.backend.lrem(&self.key, &pending.raw).await? > 0)
    }

    /// Requeue a partially failed entry with its attempt count bumped.
    ///
    /// Returns `None` when another pump already removed the entry.
    pub async fn reschedule_failed(
        &self,
        pending: &PendingCleanup,
    ) -> QueueResult<Option<CleanupEntry>> {
        if !self.complete(pending).await? {
            return Ok(None);
        }
        let entry = CleanupEntry {
            attempts: pending.entry.attempts.saturating_add(1),
            ..pending.entry.clone()
        };
        self.push(&entry).await?;
        Ok(Some(entry))
    }

    /// Drop every entry for a job.
    pub async fn cancel(&self, job_uid: &JobUid) -> QueueResult<usize> {
        let mut removed = 0;
        for pending in self.pending().await? {
            if &pending.entry.job_uid == job_uid && self.complete(&pending).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn len(&self) -> QueueResult<u64> {
        Ok(self.backend.llen(&self.key).await?)
    }
}
