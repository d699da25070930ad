//! User-facing job records (`job:<uid>` hashes).

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use resumeflow_core::{Job, JobUid, JobUpdate};

use crate::backend::Backend;
use crate::codec;
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

#[derive(Debug, Clone)]
pub struct JobStore {
    backend: Arc<dyn Backend>,
    config: QueueConfig,
}

impl JobStore {
    pub fn new(backend: Arc<dyn Backend>, config: QueueConfig) -> Self {
        Self { backend, config }
    }

    /// Persist a new job; the record expires after the retention period.
    #[instrument(skip(self, job), fields(job_uid = %job.uid), err)]
    pub async fn create(&self, job: &Job) -> QueueResult<()> {
        let fields = codec::encode_job(job)?;
        self.backend
            .hset(
                &self.config.keys.job(&job.uid),
                &fields,
                Some(self.config.job_retention),
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, uid: &JobUid) -> QueueResult<Option<Job>> {
        let key = self.config.keys.job(uid);
        let fields = self.backend.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        codec::decode_job(&key, &fields).map(Some)
    }

    /// Apply an update and touch `updated_at`.
    ///
    /// Rejects non-monotonic status changes with a domain error. The record's
    /// remaining retention is left untouched.
    #[instrument(skip(self, update), fields(job_uid = %uid, status = ?update.status), err)]
    pub async fn update(&self, uid: &JobUid, update: JobUpdate) -> QueueResult<Job> {
        let mut job = self
            .get(uid)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(uid.clone()))?;
        job.apply(update, Utc::now())?;

        let fields = codec::encode_job(&job)?;
        self.backend
            .hset(&self.config.keys.job(uid), &fields, None)
            .await?;
        debug!(status = %job.status, "job updated");
        Ok(job)
    }

    pub async fn delete(&self, uid: &JobUid) -> QueueResult<bool> {
        Ok(self.backend.del(&self.config.keys.job(uid)).await?)
    }

    pub async fn exists(&self, uid: &JobUid) -> QueueResult<bool> {
        Ok(self.backend.exists(&self.config.keys.job(uid)).await?)
    }
}
