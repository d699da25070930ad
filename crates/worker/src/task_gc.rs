//! Periodic collection of floating task records.

use std::time::Duration;

use tracing::{info, instrument, warn};

use resumeflow_core::JobUpdate;
use resumeflow_infra::{JobStore, QueueError, QueueResult, TaskQueue};

use crate::lifecycle::{Shutdown, run_periodic};

/// Error recorded on a job whose task record was collected without an outcome.
pub const LOST_TASK_ERROR: &str = "task lost before completion";

/// Deletes floating task records and fails the jobs they belonged to, so a
/// lost task shows up as `Failed` instead of `Processing` until retention.
#[derive(Debug, Clone)]
pub struct TaskGc {
    queue: TaskQueue,
    jobs: JobStore,
    max_age: Duration,
}

impl TaskGc {
    pub fn new(queue: TaskQueue, jobs: JobStore, max_age: Duration) -> Self {
        Self {
            queue,
            jobs,
            max_age,
        }
    }

    /// One sweep; returns how many jobs were failed.
    #[instrument(skip(self), err)]
    pub async fn run_once(&self) -> QueueResult<usize> {
        let sweep = self.queue.sweep_floating_tasks(self.max_age).await?;
        let mut failed = 0;
        for task in &sweep.orphaned {
            match self
                .jobs
                .update(&task.job_uid, JobUpdate::failed(LOST_TASK_ERROR))
                .await
            {
                Ok(_) => failed += 1,
                // Already terminal or expired: nothing to report.
                Err(QueueError::Domain(_) | QueueError::JobNotFound(_)) => {}
                Err(e) => {
                    warn!(job_uid = %task.job_uid, error = %e, "could not fail job of lost task")
                }
            }
        }
        if failed > 0 {
            info!(failed, "failed jobs with lost tasks");
        }
        Ok(failed)
    }

    pub async fn run(self, period: Duration, shutdown: Shutdown) {
        let this = &self;
        run_periodic("task-gc", period, shutdown, move || async move {
            this.run_once().await.map(drop)
        })
        .await;
    }
}
