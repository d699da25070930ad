//! Queue consumer with bounded concurrency and drain-on-shutdown.
//!
//! One consumer loop per worker. It takes a concurrency permit *before*
//! popping a task, so a task is only ever removed from the queue when it can
//! start right away. Each admitted task runs as its own tokio task and always
//! ends in an explicit [`TaskOutcome`]; processor errors and panics are caught
//! at that boundary and never reach the loop or sibling tasks.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use resumeflow_core::task::offset;
use resumeflow_core::{JobStatus, JobUid, JobUpdate, QueuedTask};
use resumeflow_infra::{CleanupQueue, JobStore, QueueError, QueueResult, TaskQueue};

use crate::lifecycle::{ErrorBackoff, Shutdown, pause};
use crate::processor::{ProcessingError, ProcessingOutput, Processor};
use crate::retry_pump::RetryPump;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Tries per task outcome write before the task is reported lost.
const OUTCOME_WRITE_ATTEMPTS: u32 = 4;
const OUTCOME_WRITE_DELAY: Duration = Duration::from_millis(100);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent processing slots (K)
    pub concurrency: usize,
    /// Longest single blocking wait on the queue; bounds shutdown latency
    pub dequeue_timeout: Duration,
    /// How often the retry listener promotes due retries
    pub retry_interval: Duration,
    /// Initial pause after a failed dequeue (doubles while failures persist)
    pub error_backoff: Duration,
    /// Grace period before a finished job's resources are deleted; `None`
    /// disables scheduled cleanup
    pub cleanup_delay: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            dequeue_timeout: Duration::from_secs(1),
            retry_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(5),
            cleanup_delay: Some(DAY),
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_cleanup_delay(mut self, delay: Option<Duration>) -> Self {
        self.cleanup_delay = delay;
        self
    }
}

/// How one admitted task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Failed, retry scheduled
    Retrying,
    /// Failed permanently
    Failed,
    /// The outcome could not be recorded (record gone or store failure)
    Lost,
}

/// Outcome counts for one [`Worker::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub lost: u64,
    /// Still running when a forced shutdown stopped the drain
    pub abandoned: u64,
}

impl WorkerReport {
    pub fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.completed += 1,
            TaskOutcome::Retrying => self.retried += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Lost => self.lost += 1,
        }
    }

    fn record_join(&mut self, joined: Result<TaskOutcome, JoinError>) {
        match joined {
            Ok(outcome) => self.record(outcome),
            Err(e) => {
                error!(error = %e, "task unit ended abnormally");
                self.lost += 1;
            }
        }
    }

    pub fn total(&self) -> u64 {
        self.completed + self.retried + self.failed + self.lost + self.abandoned
    }
}

#[derive(Clone)]
pub struct Worker {
    queue: TaskQueue,
    jobs: JobStore,
    cleanup: CleanupQueue,
    processor: Arc<dyn Processor>,
    permits: Arc<Semaphore>,
    config: WorkerConfig,
}

impl core::fmt::Debug for Worker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl Worker {
    pub fn new(
        queue: TaskQueue,
        jobs: JobStore,
        cleanup: CleanupQueue,
        processor: Arc<dyn Processor>,
        config: WorkerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            queue,
            jobs,
            cleanup,
            processor,
            permits,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Consume tasks until shutdown, then drain in-flight work.
    ///
    /// The retry listener runs alongside the consumer for the same lifetime.
    pub async fn run(self, shutdown: Shutdown) -> WorkerReport {
        let retry_listener = tokio::spawn(
            RetryPump::new(self.queue.clone(), self.config.retry_interval)
                .run(shutdown.clone())
                .instrument(info_span!("retry_listener")),
        );

        let report = self.job_consumer(&shutdown).await;

        if let Err(e) = retry_listener.await {
            warn!(error = %e, "retry listener ended abnormally");
        }
        info!(
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            lost = report.lost,
            abandoned = report.abandoned,
            "worker stopped"
        );
        report
    }

    async fn job_consumer(&self, shutdown: &Shutdown) -> WorkerReport {
        let mut in_flight: JoinSet<TaskOutcome> = JoinSet::new();
        let mut report = WorkerReport::default();
        let mut backoff = ErrorBackoff::new(self.config.error_backoff);

        info!(concurrency = self.config.concurrency, "worker started");
        while !shutdown.is_triggered() {
            while let Some(Some(joined)) = in_flight.join_next().now_or_never() {
                report.record_join(joined);
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Not cancelled by shutdown: a popped task must not be dropped.
            let task = match self.queue.dequeue(self.config.dequeue_timeout).await {
                Ok(Some(task)) => {
                    backoff.success();
                    task
                }
                Ok(None) => {
                    backoff.success();
                    continue;
                }
                Err(e) => {
                    drop(permit);
                    let delay = backoff.failure();
                    error!(
                        error = %e,
                        failures = backoff.consecutive_failures(),
                        backoff_secs = delay.as_secs_f64(),
                        "dequeue failed"
                    );
                    if !pause(shutdown, delay).await {
                        break;
                    }
                    continue;
                }
            };

            let span = info_span!("task", task_id = %task.task_id, job_uid = %task.job_uid);
            let worker = self.clone();
            in_flight.spawn(
                async move {
                    let _permit = permit;
                    worker.execute(task).await
                }
                .instrument(span),
            );
        }

        info!(in_flight = in_flight.len(), "shutdown requested, draining");
        loop {
            tokio::select! {
                biased;
                joined = in_flight.join_next() => match joined {
                    Some(joined) => report.record_join(joined),
                    None => break,
                },
                _ = shutdown.forced() => {
                    let abandoned = in_flight.len();
                    warn!(abandoned, "forced shutdown, abandoning in-flight tasks");
                    report.abandoned += abandoned as u64;
                    in_flight.detach_all();
                    break;
                }
            }
        }
        info!("drained");
        report
    }

    /// Run one admitted task to an explicit outcome.
    async fn execute(&self, task: QueuedTask) -> TaskOutcome {
        let task_id = task.task_id;
        match self.queue.mark_processing(&task_id).await {
            Ok(()) => {}
            Err(QueueError::TaskNotFound(_)) => {
                warn!("task record vanished before processing");
                return TaskOutcome::Lost;
            }
            // The active marker is bookkeeping; the attempt still runs.
            Err(e) => error!(error = %e, "failed to mark task processing"),
        }
        self.update_job(&task.job_uid, JobUpdate::status(JobStatus::Processing))
            .await;

        debug!(retries = task.retries, "processing");
        let result = AssertUnwindSafe(self.processor.process(
            &task.job_uid,
            &task.file_path,
            &task.payload,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(ProcessingError::from_panic(&*panic)));

        match result {
            Ok(output) => self.complete(&task, output).await,
            Err(e) => self.fail(&task, &e).await,
        }
    }

    async fn complete(&self, task: &QueuedTask, output: ProcessingOutput) -> TaskOutcome {
        if let Err(e) = self
            .persist("completion", || {
                self.queue.mark_completed(&task.task_id, output.result.clone())
            })
            .await
        {
            error!(error = %e, "failed to record task completion");
            return TaskOutcome::Lost;
        }
        self.update_job(
            &task.job_uid,
            JobUpdate::completed(output.result, output.result_url),
        )
        .await;
        self.schedule_cleanup(&task.job_uid).await;

        info!("task completed");
        TaskOutcome::Completed
    }

    async fn fail(&self, task: &QueuedTask, err: &ProcessingError) -> TaskOutcome {
        let message = err.to_string();
        match self
            .persist("failure", || self.queue.mark_failed(&task.task_id, &message, true))
            .await
        {
            // The job stays Processing while a retry is pending.
            Ok(true) => TaskOutcome::Retrying,
            Ok(false) => {
                self.update_job(&task.job_uid, JobUpdate::failed(message))
                    .await;
                self.schedule_cleanup(&task.job_uid).await;
                TaskOutcome::Failed
            }
            Err(e) => {
                error!(error = %e, processing_error = %err, "failed to record task failure");
                TaskOutcome::Lost
            }
        }
    }

    /// Run a task outcome write, retrying transient store errors.
    ///
    /// Repeating an outcome write after a store error converges on the same
    /// state as a single successful write.
    async fn persist<T, F, Fut>(&self, what: &'static str, mut write: F) -> QueueResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QueueResult<T>>,
    {
        let mut delay = OUTCOME_WRITE_DELAY;
        let mut attempt = 1;
        loop {
            match write().await {
                Err(e) if e.is_transient() && attempt < OUTCOME_WRITE_ATTEMPTS => {
                    warn!(error = %e, attempt, what, "outcome write failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Job record writes never change a task's outcome.
    async fn update_job(&self, uid: &JobUid, update: JobUpdate) {
        match self.jobs.update(uid, update).await {
            Ok(_) => {}
            // Duplicate attempt after an earlier terminal write.
            Err(e @ QueueError::Domain(_)) => warn!(error = %e, "job update rejected"),
            Err(QueueError::JobNotFound(_)) => warn!("job record missing"),
            Err(e) => error!(error = %e, "failed to update job"),
        }
    }

    async fn schedule_cleanup(&self, uid: &JobUid) {
        let Some(delay) = self.config.cleanup_delay else {
            return;
        };
        if let Err(e) = self.cleanup.schedule(uid, offset(Utc::now(), delay)).await {
            error!(error = %e, "failed to schedule resource cleanup");
        }
    }
}
