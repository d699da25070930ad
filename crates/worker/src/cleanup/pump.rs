//! Execution of due cleanup entries and the orphaned-upload sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use resumeflow_infra::{CleanupQueue, JobStore, PendingCleanup, QueueResult};

use super::{CleanupConfig, CleanupError, LocalFileStore, ResourceCleaner};
use crate::lifecycle::{Shutdown, run_periodic};

/// Counts from one pass over the cleanup queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Entries whose every resource was deleted
    pub executed: usize,
    /// Partially failed entries kept for another attempt
    pub rescheduled: usize,
    /// Entries given up on after `max_attempts`
    pub dropped: usize,
}

/// Executes due cleanup entries and sweeps orphaned uploads.
///
/// The sweep is independent of the queue: it catches uploads whose cleanup
/// entry was never written or was lost.
#[derive(Clone)]
pub struct CleanupPump {
    queue: CleanupQueue,
    jobs: JobStore,
    cleaners: Vec<Arc<dyn ResourceCleaner>>,
    uploads: Option<LocalFileStore>,
    config: CleanupConfig,
}

impl core::fmt::Debug for CleanupPump {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let names: Vec<&str> = self.cleaners.iter().map(|c| c.name()).collect();
        f.debug_struct("CleanupPump")
            .field("cleaners", &names)
            .field("uploads", &self.uploads)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CleanupPump {
    pub fn new(queue: CleanupQueue, jobs: JobStore, config: CleanupConfig) -> Self {
        Self {
            queue,
            jobs,
            cleaners: Vec::new(),
            uploads: None,
            config,
        }
    }

    pub fn with_cleaner(mut self, cleaner: Arc<dyn ResourceCleaner>) -> Self {
        self.cleaners.push(cleaner);
        self
    }

    /// Upload storage to sweep for orphans.
    pub fn with_uploads(mut self, uploads: LocalFileStore) -> Self {
        self.uploads = Some(uploads);
        self
    }

    /// Execute every entry due at `now`.
    #[instrument(skip(self), err)]
    pub async fn run_once(&self, now: DateTime<Utc>) -> QueueResult<CleanupReport> {
        let mut report = CleanupReport::default();
        for pending in self.queue.due(now).await? {
            self.execute(&pending, &mut report).await?;
        }
        if report != CleanupReport::default() {
            info!(
                executed = report.executed,
                rescheduled = report.rescheduled,
                dropped = report.dropped,
                "cleanup pass finished"
            );
        }
        Ok(report)
    }

    async fn execute(&self, pending: &PendingCleanup, report: &mut CleanupReport) -> QueueResult<()> {
        let entry = &pending.entry;
        let mut failed = 0usize;
        for cleaner in &self.cleaners {
            if let Err(e) = cleaner.delete_job_resources(&entry.job_uid).await {
                failed += 1;
                warn!(
                    job_uid = %entry.job_uid,
                    resource = cleaner.name(),
                    attempt = entry.attempts + 1,
                    error = %e,
                    "resource deletion failed"
                );
            }
        }

        if failed == 0 {
            if self.queue.complete(pending).await? {
                report.executed += 1;
            }
        } else if entry.attempts.saturating_add(1) >= self.config.max_attempts {
            error!(
                job_uid = %entry.job_uid,
                attempts = entry.attempts + 1,
                failed_resources = failed,
                "giving up on cleanup entry"
            );
            if self.queue.complete(pending).await? {
                report.dropped += 1;
            }
        } else if self.queue.reschedule_failed(pending).await?.is_some() {
            report.rescheduled += 1;
        }
        Ok(())
    }

    /// Delete uploads older than the retention period that belong to no
    /// pending or processing job.
    #[instrument(skip(self), err)]
    pub async fn sweep_orphans(&self) -> Result<usize, SweepError> {
        let Some(uploads) = &self.uploads else {
            return Ok(0);
        };

        let mut removed = 0;
        for uid in uploads.stale_job_dirs(self.config.retention).await? {
            let active = self
                .jobs
                .get(&uid)
                .await?
                .is_some_and(|job| !job.status.is_terminal());
            if active {
                continue;
            }
            match uploads.delete_job_resources(&uid).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(job_uid = %uid, error = %e, "failed to remove orphaned upload"),
            }
        }

        if removed > 0 {
            info!(removed, "orphaned uploads removed");
        }
        Ok(removed)
    }

    /// Run both the queue pass and the orphan sweep until shutdown.
    pub async fn run(self, shutdown: Shutdown) {
        let this = &self;
        let queue_pass = run_periodic("cleanup", self.config.interval, shutdown.clone(), move || {
            async move { this.run_once(Utc::now()).await.map(drop) }
        });
        let sweep = run_periodic(
            "orphan-sweep",
            self.config.sweep_interval,
            shutdown,
            move || async move { this.sweep_orphans().await.map(drop) },
        );
        tokio::join!(queue_pass, sweep);
    }
}

/// Orphan sweep failure: listing uploads or reading job records.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Uploads(#[from] CleanupError),

    #[error(transparent)]
    Queue(#[from] resumeflow_infra::QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use resumeflow_core::{Job, JobStatus, JobUid, JobUpdate};
    use resumeflow_infra::{InMemoryBackend, QueueConfig};

    /// Records deletions; fails for uids listed in `failing`.
    struct Recording {
        name: &'static str,
        failing: Vec<&'static str>,
        deleted: Mutex<Vec<String>>,
    }

    impl Recording {
        fn new(name: &'static str, failing: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                failing,
                deleted: Mutex::new(Vec::new()),
            })
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ResourceCleaner for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn delete_job_resources(&self, job_uid: &JobUid) -> Result<(), CleanupError> {
            if self.failing.iter().any(|f| *f == job_uid.as_str()) {
                return Err(CleanupError::Status {
                    target: self.name.to_string(),
                    status: 503,
                });
            }
            self.deleted.lock().unwrap().push(job_uid.to_string());
            Ok(())
        }
    }

    fn stores() -> (CleanupQueue, JobStore) {
        let backend = InMemoryBackend::arc();
        let config = QueueConfig::default();
        (
            CleanupQueue::new(backend.clone(), &config.keys),
            JobStore::new(backend, config),
        )
    }

    fn uid(s: &str) -> JobUid {
        JobUid::parse(s).unwrap()
    }

    #[tokio::test]
    async fn due_entries_run_every_cleaner() {
        let (queue, jobs) = stores();
        let (graph, vectors) = (Recording::new("graph", vec![]), Recording::new("vectors", vec![]));
        let pump = CleanupPump::new(queue.clone(), jobs, CleanupConfig::default())
            .with_cleaner(graph.clone())
            .with_cleaner(vectors.clone());

        let now = Utc::now();
        queue.schedule(&uid("due"), now).await.unwrap();
        queue
            .schedule(&uid("later"), now + chrono::Duration::hours(1))
            .await
            .unwrap();

        let report = pump.run_once(now).await.unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(graph.deleted(), vec!["due"]);
        assert_eq!(vectors.deleted(), vec!["due"]);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn one_failing_store_does_not_block_the_others() {
        let (queue, jobs) = stores();
        let graph = Recording::new("graph", vec!["j1"]);
        let vectors = Recording::new("vectors", vec![]);
        let pump = CleanupPump::new(queue.clone(), jobs, CleanupConfig::default())
            .with_cleaner(graph.clone())
            .with_cleaner(vectors.clone());

        let now = Utc::now();
        queue.schedule(&uid("j1"), now).await.unwrap();

        let report = pump.run_once(now).await.unwrap();
        assert_eq!(report.rescheduled, 1);
        assert_eq!(vectors.deleted(), vec!["j1"]);
        assert!(graph.deleted().is_empty());

        let left = queue.pending().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].entry.attempts, 1);
    }

    #[tokio::test]
    async fn entries_are_dropped_after_max_attempts() {
        let (queue, jobs) = stores();
        let config = CleanupConfig {
            max_attempts: 2,
            ..CleanupConfig::default()
        };
        let pump = CleanupPump::new(queue.clone(), jobs, config)
            .with_cleaner(Recording::new("graph", vec!["j1"]));

        let now = Utc::now();
        queue.schedule(&uid("j1"), now).await.unwrap();

        assert_eq!(pump.run_once(now).await.unwrap().rescheduled, 1);
        assert_eq!(pump.run_once(now).await.unwrap().dropped, 1);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_only_uploads_without_an_active_job() {
        let (queue, jobs) = stores();
        let dir = tempfile::tempdir().unwrap();
        let uploads = LocalFileStore::new(dir.path());
        let config = CleanupConfig {
            retention: std::time::Duration::ZERO,
            ..CleanupConfig::default()
        };

        for name in ["orphan", "running", "finished"] {
            uploads.store(&uid(name), "cv.pdf", b"x").await.unwrap();
        }
        jobs.create(&Job::new(uid("running"), "/f")).await.unwrap();
        jobs.update(&uid("running"), JobUpdate::status(JobStatus::Processing))
            .await
            .unwrap();
        jobs.create(&Job::new(uid("finished"), "/f")).await.unwrap();
        jobs.update(&uid("finished"), JobUpdate::failed("bad scan"))
            .await
            .unwrap();

        let pump = CleanupPump::new(queue, jobs, config).with_uploads(uploads.clone());
        assert_eq!(pump.sweep_orphans().await.unwrap(), 2);
        assert!(!uploads.job_dir(&uid("orphan")).exists());
        assert!(!uploads.job_dir(&uid("finished")).exists());
        assert!(uploads.job_dir(&uid("running")).exists());
    }

    #[tokio::test]
    async fn sweep_without_uploads_is_a_no_op() {
        let (queue, jobs) = stores();
        let pump = CleanupPump::new(queue, jobs, CleanupConfig::default());
        assert_eq!(pump.sweep_orphans().await.unwrap(), 0);
    }
}
