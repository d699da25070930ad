//! Job submission and status queries.

use serde_json::Value as JsonValue;
use tracing::{error, info, instrument};

use resumeflow_core::{Job, JobUid, JobUpdate, JobView};

use crate::error::{QueueError, QueueResult};
use crate::job_store::JobStore;
use crate::task_queue::TaskQueue;

/// Entry point for callers: creates the job record, then queues its first task.
///
/// Submission only acknowledges; processing outcomes are read back through
/// [`Submitter::status`].
#[derive(Debug, Clone)]
pub struct Submitter {
    jobs: JobStore,
    queue: TaskQueue,
}

impl Submitter {
    pub fn new(jobs: JobStore, queue: TaskQueue) -> Self {
        Self { jobs, queue }
    }

    pub async fn submit(
        &self,
        file_path: &str,
        payload: JsonValue,
        priority: i32,
    ) -> QueueResult<JobUid> {
        self.submit_as(JobUid::new(), file_path, payload, priority)
            .await
    }

    /// Submit under a caller-chosen uid (e.g. one already used as the upload
    /// directory name).
    #[instrument(skip(self, file_path, payload), fields(job_uid = %uid), err)]
    pub async fn submit_as(
        &self,
        uid: JobUid,
        file_path: &str,
        payload: JsonValue,
        priority: i32,
    ) -> QueueResult<JobUid> {
        let job = Job::new(uid, file_path);
        self.jobs.create(&job).await?;

        if let Err(e) = self.queue.enqueue(&job.uid, file_path, payload, priority).await {
            // Leave a visible terminal state rather than a job stuck in Pending.
            if let Err(mark) = self
                .jobs
                .update(&job.uid, JobUpdate::failed("failed to queue job"))
                .await
            {
                error!(error = %mark, "could not mark unqueued job as failed");
            }
            return Err(e);
        }

        info!(priority, "job submitted");
        Ok(job.uid)
    }

    pub async fn status(&self, uid: &JobUid) -> QueueResult<JobView> {
        self.jobs
            .get(uid)
            .await?
            .map(|job| job.view())
            .ok_or_else(|| QueueError::JobNotFound(uid.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::backend::InMemoryBackend;
    use crate::config::QueueConfig;
    use resumeflow_core::JobStatus;

    fn submitter() -> (TaskQueue, Submitter) {
        let backend = InMemoryBackend::arc();
        let config = QueueConfig::default();
        let queue = TaskQueue::new(backend.clone(), config.clone());
        let jobs = JobStore::new(backend, config);
        (queue.clone(), Submitter::new(jobs, queue))
    }

    #[tokio::test]
    async fn submit_creates_pending_job_and_queues_task() {
        let (queue, submitter) = submitter();
        let uid = submitter
            .submit("/uploads/cv.pdf", serde_json::json!({"pages": 2}), 0)
            .await
            .unwrap();

        let view = submitter.status(&uid).await.unwrap();
        assert_eq!(view.status, JobStatus::Pending);
        assert_eq!(view.error, None);

        let task = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(task.job_uid, uid);
        assert_eq!(task.file_path, "/uploads/cv.pdf");
    }

    #[tokio::test]
    async fn unknown_job_status_is_not_found() {
        let (_, submitter) = submitter();
        let uid = JobUid::parse("missing").unwrap();
        assert!(matches!(
            submitter.status(&uid).await,
            Err(QueueError::JobNotFound(_))
        ));
    }
}
