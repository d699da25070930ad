//! Two-lane FIFO task queue.
//!
//! Task ids flow through a lane list, the active set, and the retry schedule.
//! Every step is a single-key atomic store operation. Moves write the new
//! reference before removing the old one, so a failed store call can leave an
//! id briefly referenced twice (at worst a duplicate attempt) but never
//! referenced nowhere. Only a crash between dequeue and `mark_processing` can
//! leave a floating record, which [`TaskQueue::sweep_floating_tasks`] collects.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, instrument, warn};

use resumeflow_core::{FailureDecision, JobUid, QueuedTask, TaskId, TaskStatus};

use crate::backend::Backend;
use crate::codec::TaskPatch;
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::retry_schedule::RetrySchedule;
use crate::task_store::TaskStore;

/// Retry entries promoted per schedule scan.
const PROMOTE_BATCH: usize = 100;

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks waiting in both lanes
    pub queue_length: u64,
    /// Of which in the priority lane
    pub priority_length: u64,
    pub cleanup_queue_length: u64,
    pub scheduled_retries: u64,
    /// Tasks between `mark_processing` and their outcome
    pub active_tasks: u64,
}

/// Records removed by one floating-record sweep.
#[derive(Debug, Clone, Default)]
pub struct FloatingSweep {
    /// Decodable records; their jobs never got an outcome
    pub orphaned: Vec<QueuedTask>,
    /// Undecodable records
    pub malformed: usize,
}

impl FloatingSweep {
    pub fn removed(&self) -> usize {
        self.orphaned.len() + self.malformed
    }
}

#[derive(Debug, Clone)]
pub struct TaskQueue {
    backend: Arc<dyn Backend>,
    config: QueueConfig,
    tasks: TaskStore,
    retries: RetrySchedule,
    /// Blocking-pop order: priority lane first.
    lanes: [String; 2],
}

impl TaskQueue {
    pub fn new(backend: Arc<dyn Backend>, config: QueueConfig) -> Self {
        let keys = &config.keys;
        Self {
            tasks: TaskStore::new(backend.clone(), keys.clone()),
            retries: RetrySchedule::new(backend.clone(), keys),
            lanes: [keys.priority_lane(), keys.normal_lane()],
            backend,
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn task_store(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn retry_schedule(&self) -> &RetrySchedule {
        &self.retries
    }

    fn priority_lane(&self) -> &str {
        &self.lanes[0]
    }

    fn normal_lane(&self) -> &str {
        &self.lanes[1]
    }

    /// Write a fresh task record and push its id onto a lane.
    ///
    /// `priority > 0` selects the priority lane.
    #[instrument(skip(self, file_path, payload), fields(job_uid = %job_uid), err)]
    pub async fn enqueue(
        &self,
        job_uid: &JobUid,
        file_path: &str,
        payload: JsonValue,
        priority: i32,
    ) -> QueueResult<TaskId> {
        let task = QueuedTask::new(
            job_uid.clone(),
            file_path,
            payload,
            priority,
            self.config.retry.max_retries,
        );
        self.tasks.put(&task, self.config.job_timeout).await?;

        let lane = if task.is_priority() {
            self.priority_lane()
        } else {
            self.normal_lane()
        };
        self.backend.rpush(lane, &task.task_id.to_string()).await?;

        debug!(task_id = %task.task_id, lane, "task enqueued");
        Ok(task.task_id)
    }

    /// Pop the next task, waiting up to `timeout`.
    ///
    /// `Ok(None)` means no work: either the wait timed out or the popped id had
    /// no usable record. Only store failures are errors.
    pub async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<QueuedTask>> {
        let Some((lane, raw)) = self.backend.blpop(&self.lanes, timeout).await? else {
            return Ok(None);
        };

        let task_id: TaskId = match raw.parse() {
            Ok(id) => id,
            Err(e) => {
                warn!(lane = %lane, raw = %raw, error = %e, "discarding unparseable task id");
                return Ok(None);
            }
        };

        match self.tasks.get(&task_id).await {
            Ok(Some(task)) => {
                debug!(task_id = %task_id, lane = %lane, "task dequeued");
                Ok(Some(task))
            }
            Ok(None) => {
                warn!(task_id = %task_id, "dequeued task has no record, skipping");
                Ok(None)
            }
            Err(e @ QueueError::Malformed { .. }) => {
                warn!(task_id = %task_id, error = %e, "dequeued task record is malformed, skipping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Flag a dequeued task as running and add it to the active set.
    pub async fn mark_processing(&self, task_id: &TaskId) -> QueueResult<()> {
        if !self.backend.exists(&self.config.keys.task(task_id)).await? {
            return Err(QueueError::TaskNotFound(*task_id));
        }
        self.tasks
            .patch(task_id, &TaskPatch::status(TaskStatus::Processing), None)
            .await?;
        self.backend
            .sadd(&self.config.keys.active(), &task_id.to_string())
            .await?;
        Ok(())
    }

    /// Record a successful outcome; the record then lives for `completed_ttl`.
    #[instrument(skip(self, result), fields(task_id = %task_id), err)]
    pub async fn mark_completed(&self, task_id: &TaskId, result: JsonValue) -> QueueResult<()> {
        let mut task = self.tasks.require(task_id).await?;
        task.record_success(result, Utc::now());

        let patch = TaskPatch {
            status: Some(task.status),
            result: task.result,
            completed_at: task.completed_at,
            ..Default::default()
        };
        self.tasks
            .patch(task_id, &patch, Some(self.config.completed_ttl))
            .await?;
        self.backend
            .srem(&self.config.keys.active(), &task_id.to_string())
            .await?;
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Returns `true` when a retry was scheduled, `false` when the task is now
    /// terminally failed (retries exhausted or `retry == false`).
    #[instrument(skip(self, error), fields(task_id = %task_id), err)]
    pub async fn mark_failed(
        &self,
        task_id: &TaskId,
        error: &str,
        retry: bool,
    ) -> QueueResult<bool> {
        self.mark_failed_at(task_id, error, retry, Utc::now()).await
    }

    pub async fn mark_failed_at(
        &self,
        task_id: &TaskId,
        error: &str,
        retry: bool,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let mut task = self.tasks.require(task_id).await?;
        let decision = task.record_failure(error, retry, &self.config.retry, now);
        let active = self.config.keys.active();

        match decision {
            FailureDecision::Retry { ready_at, delay } => {
                let patch = TaskPatch {
                    status: Some(task.status),
                    retries: Some(task.retries),
                    last_error: task.last_error,
                    retry_at: task.retry_at,
                    ..Default::default()
                };
                // Keep the record alive through the wait and the next attempt.
                let ttl = self.config.job_timeout.saturating_add(delay);
                // Schedule before anything else: the id stays referenced by the
                // active set or the schedule whichever later step fails, and a
                // failed schedule leaves nothing to undo.
                self.retries.schedule(task_id, ready_at).await?;
                self.tasks.patch(task_id, &patch, Some(ttl)).await?;
                self.backend.srem(&active, &task_id.to_string()).await?;

                warn!(
                    retries = task.retries,
                    max_retries = task.max_retries,
                    delay_secs = delay.as_secs_f64(),
                    error,
                    "task failed, retry scheduled"
                );
                Ok(true)
            }
            FailureDecision::Terminal => {
                let patch = TaskPatch {
                    status: Some(task.status),
                    last_error: task.last_error,
                    failed_at: task.failed_at,
                    ..Default::default()
                };
                self.tasks
                    .patch(task_id, &patch, Some(self.config.failed_ttl))
                    .await?;
                self.backend.srem(&active, &task_id.to_string()).await?;

                error!(retries = task.retries, error, "task failed permanently");
                Ok(false)
            }
        }
    }

    /// Move every due retry back onto the normal lane.
    #[instrument(skip(self), err)]
    pub async fn process_retries(&self) -> QueueResult<usize> {
        self.process_retries_at(Utc::now()).await
    }

    /// [`process_retries`](Self::process_retries) against an explicit clock.
    pub async fn process_retries_at(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let mut promoted = 0;
        loop {
            let due = self.retries.due(now, PROMOTE_BATCH).await?;
            let scanned = due.len();

            for member in due {
                let task_id: TaskId = match member.parse() {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(member = %member, error = %e, "dropping unparseable retry entry");
                        self.retries.remove(&member).await?;
                        continue;
                    }
                };
                // Gone means another pump already promoted it.
                let Some(seen) = self.retries.score_of(&member).await? else {
                    continue;
                };
                if !self.backend.exists(&self.config.keys.task(&task_id)).await? {
                    warn!(task_id = %task_id, "retry entry has no record, dropping");
                    self.retries.remove(&member).await?;
                    continue;
                }

                // Push before removing the entry: a failure in between leaves
                // the entry due and the next pass pushes again.
                self.tasks
                    .patch(&task_id, &TaskPatch::status(TaskStatus::Queued), None)
                    .await?;
                self.backend.rpush(self.normal_lane(), &member).await?;
                self.retries.release(&member, seen).await?;
                promoted += 1;
            }

            if scanned < PROMOTE_BATCH {
                break;
            }
        }

        if promoted > 0 {
            info!(promoted, "promoted due retries");
        }
        Ok(promoted)
    }

    /// Delete floating task records older than `max_age`, returning how many
    /// were removed. See [`sweep_floating_tasks`](Self::sweep_floating_tasks).
    pub async fn cleanup_expired_tasks(&self, max_age: Duration) -> QueueResult<usize> {
        Ok(self.sweep_floating_tasks(max_age).await?.removed())
    }

    /// Delete floating task records older than `max_age`.
    ///
    /// A record is floating when it is not terminal and its id sits in neither
    /// lane, the active set, nor the retry schedule. Undecodable records are
    /// deleted regardless of age. Terminal records are left to their TTL.
    /// The removed tasks are returned so their jobs can be given an outcome.
    #[instrument(skip(self), err)]
    pub async fn sweep_floating_tasks(&self, max_age: Duration) -> QueueResult<FloatingSweep> {
        let mut sweep = FloatingSweep::default();
        let cutoff = match chrono::Duration::from_std(max_age) {
            Ok(age) => Utc::now() - age,
            Err(_) => return Ok(sweep),
        };

        let mut queued: HashSet<String> = HashSet::new();
        for lane in &self.lanes {
            queued.extend(self.backend.lrange(lane).await?);
        }
        let active = self.config.keys.active();

        for key in self.tasks.record_keys().await? {
            let Some(task_id) = self.tasks.id_from_key(&key) else {
                continue;
            };
            let member = task_id.to_string();
            if queued.contains(&member)
                || self.backend.sismember(&active, &member).await?
                || self.retries.contains(&task_id).await?
            {
                continue;
            }

            match self.tasks.get_key(&key).await {
                Ok(Some(task)) if !task.status.is_terminal() && task.enqueued_at < cutoff => {
                    if self.tasks.delete(&task_id).await? {
                        sweep.orphaned.push(task);
                    }
                }
                Ok(_) => {}
                Err(e @ QueueError::Malformed { .. }) => {
                    warn!(key = %key, error = %e, "removing malformed task record");
                    if self.tasks.delete(&task_id).await? {
                        sweep.malformed += 1;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if sweep.removed() > 0 {
            info!(
                orphaned = sweep.orphaned.len(),
                malformed = sweep.malformed,
                "removed floating task records"
            );
        }
        Ok(sweep)
    }

    pub async fn get_task(&self, task_id: &TaskId) -> QueueResult<Option<QueuedTask>> {
        self.tasks.get(task_id).await
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        let keys = &self.config.keys;
        let priority_length = self.backend.llen(self.priority_lane()).await?;
        let normal_length = self.backend.llen(self.normal_lane()).await?;
        Ok(QueueStats {
            queue_length: priority_length + normal_length,
            priority_length,
            cleanup_queue_length: self.backend.llen(&keys.cleanup()).await?,
            scheduled_retries: self.retries.len().await?,
            active_tasks: self.backend.scard(&keys.active()).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::backend::faulty::{FaultyBackend, Op};
    use resumeflow_core::RetryPolicy;

    const NO_WAIT: Duration = Duration::from_millis(10);

    fn queue_with(config: QueueConfig) -> (Arc<InMemoryBackend>, TaskQueue) {
        let backend = InMemoryBackend::arc();
        let queue = TaskQueue::new(backend.clone(), config);
        (backend, queue)
    }

    fn queue() -> (Arc<InMemoryBackend>, TaskQueue) {
        queue_with(QueueConfig::default())
    }

    fn uid(s: &str) -> JobUid {
        JobUid::parse(s).unwrap()
    }

    #[tokio::test]
    async fn priority_tasks_dequeue_first_and_lanes_stay_fifo() {
        let (_, queue) = queue();
        let n1 = queue.enqueue(&uid("n1"), "/n1", serde_json::json!({}), 0).await.unwrap();
        let p1 = queue.enqueue(&uid("p1"), "/p1", serde_json::json!({}), 5).await.unwrap();
        let n2 = queue.enqueue(&uid("n2"), "/n2", serde_json::json!({}), 0).await.unwrap();
        let p2 = queue.enqueue(&uid("p2"), "/p2", serde_json::json!({}), 1).await.unwrap();

        let mut order = Vec::new();
        while let Some(task) = queue.dequeue(NO_WAIT).await.unwrap() {
            order.push(task.task_id);
        }
        assert_eq!(order, vec![p1, p2, n1, n2]);
    }

    #[tokio::test]
    async fn dequeue_returns_exactly_what_was_enqueued() {
        let (_, queue) = queue();
        let payload = serde_json::json!({
            "name": "Ada",
            "skills": ["rust", "sql"],
            "years": 7.5,
            "unicode": "résumé ✓",
        });
        let task_id = queue
            .enqueue(&uid("j1"), "/tmp/a.pdf", payload.clone(), 0)
            .await
            .unwrap();

        let task = queue.dequeue(NO_WAIT).await.unwrap().unwrap();
        assert_eq!(task.task_id, task_id);
        assert_eq!(task.job_uid, uid("j1"));
        assert_eq!(task.file_path, "/tmp/a.pdf");
        assert_eq!(task.payload, payload);
        assert_eq!(task.priority, 0);
        assert_eq!(task.retries, 0);
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn dequeue_times_out_with_none() {
        let (_, queue) = queue();
        assert!(queue.dequeue(NO_WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_wakes_on_push() {
        let (_, queue) = queue();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = queue.enqueue(&uid("late"), "/f", serde_json::json!({}), 0).await.unwrap();

        let task = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(task.task_id, id);
    }

    #[tokio::test]
    async fn dequeue_skips_missing_and_malformed_records() {
        let (backend, queue) = queue();
        let keys = queue.config().keys.clone();

        let gone = queue.enqueue(&uid("gone"), "/f", serde_json::json!({}), 0).await.unwrap();
        queue.task_store().delete(&gone).await.unwrap();

        let broken = TaskId::new();
        backend
            .hset(&keys.task(&broken), &[("status".into(), "queued".into())], None)
            .await
            .unwrap();
        backend.rpush(&keys.normal_lane(), &broken.to_string()).await.unwrap();
        backend.rpush(&keys.normal_lane(), "not-a-task-id").await.unwrap();

        assert!(queue.dequeue(NO_WAIT).await.unwrap().is_none());
        assert!(queue.dequeue(NO_WAIT).await.unwrap().is_none());
        assert!(queue.dequeue(NO_WAIT).await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().queue_length, 0);
    }

    #[tokio::test]
    async fn mark_failed_retries_until_exhausted() {
        let (_, queue) = queue();
        let policy = queue.config().retry.clone();
        let id = queue.enqueue(&uid("j1"), "/f", serde_json::json!({}), 0).await.unwrap();

        for attempt in 1..=policy.max_retries {
            queue.mark_processing(&id).await.unwrap();
            let before = Utc::now();
            assert!(queue.mark_failed(&id, "boom", true).await.unwrap());

            let task = queue.get_task(&id).await.unwrap().unwrap();
            assert_eq!(task.retries, attempt);
            assert_eq!(task.status, TaskStatus::RetryScheduled);
            assert_eq!(task.last_error.as_deref(), Some("boom"));

            let ready_at = queue.retry_schedule().ready_at(&id).await.unwrap().unwrap();
            let min_delay = chrono::Duration::from_std(policy.base_delay).unwrap();
            assert!(ready_at >= before + min_delay - chrono::Duration::milliseconds(1));
            assert_eq!(queue.retry_schedule().len().await.unwrap(), 1);
            assert_eq!(queue.stats().await.unwrap().active_tasks, 0);

            queue.retry_schedule().cancel(&id).await.unwrap();
        }

        assert!(!queue.mark_failed(&id, "boom again", true).await.unwrap());
        let task = queue.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.retries, policy.max_retries);
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.failed_at.is_some());
        assert_eq!(queue.retry_schedule().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mark_failed_without_retry_is_terminal_with_audit_ttl() {
        let (_, queue) = queue();
        let id = queue.enqueue(&uid("j1"), "/f", serde_json::json!({}), 0).await.unwrap();

        assert!(!queue.mark_failed(&id, "unsupported format", false).await.unwrap());
        let ttl = queue.task_store().ttl(&id).await.unwrap().unwrap();
        assert!(ttl > queue.config().job_timeout);
        assert_eq!(queue.retry_schedule().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mark_completed_stores_result_and_clears_active() {
        let (_, queue) = queue();
        let id = queue.enqueue(&uid("j1"), "/f", serde_json::json!({}), 0).await.unwrap();
        queue.mark_processing(&id).await.unwrap();
        assert_eq!(queue.stats().await.unwrap().active_tasks, 1);

        queue
            .mark_completed(&id, serde_json::json!({"score": 91}))
            .await
            .unwrap();
        let task = queue.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(serde_json::json!({"score": 91})));
        assert!(task.completed_at.is_some());
        assert_eq!(queue.stats().await.unwrap().active_tasks, 0);
    }

    #[tokio::test]
    async fn unknown_tasks_are_not_found() {
        let (_, queue) = queue();
        let id = TaskId::new();
        assert!(matches!(
            queue.mark_processing(&id).await,
            Err(QueueError::TaskNotFound(missing)) if missing == id
        ));
        assert!(matches!(
            queue.mark_failed(&id, "x", true).await,
            Err(QueueError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn process_retries_promotes_only_due_entries_to_normal_lane() {
        let (backend, queue) = queue();
        let keys = queue.config().keys.clone();
        let now = Utc::now();

        let due = queue.enqueue(&uid("due"), "/f", serde_json::json!({}), 9).await.unwrap();
        let later = queue.enqueue(&uid("later"), "/f", serde_json::json!({}), 0).await.unwrap();
        while queue.dequeue(NO_WAIT).await.unwrap().is_some() {}

        queue.retry_schedule().schedule(&due, now).await.unwrap();
        queue
            .retry_schedule()
            .schedule(&later, now + chrono::Duration::minutes(10))
            .await
            .unwrap();

        assert_eq!(queue.process_retries_at(now).await.unwrap(), 1);
        assert_eq!(backend.lrange(&keys.normal_lane()).await.unwrap(), vec![due.to_string()]);
        assert_eq!(backend.llen(&keys.priority_lane()).await.unwrap(), 0);
        assert!(queue.retry_schedule().contains(&later).await.unwrap());
        assert_eq!(
            queue.get_task(&due).await.unwrap().unwrap().status,
            TaskStatus::Queued
        );

        // Nothing left due.
        assert_eq!(queue.process_retries_at(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn process_retries_drains_more_than_one_batch() {
        let (_, queue) = queue();
        let now = Utc::now();
        for i in 0..(PROMOTE_BATCH + 7) {
            let id = queue
                .enqueue(&uid(&format!("j{i}")), "/f", serde_json::json!({}), 0)
                .await
                .unwrap();
            queue.retry_schedule().schedule(&id, now).await.unwrap();
        }
        while queue.dequeue(NO_WAIT).await.unwrap().is_some() {}

        assert_eq!(queue.process_retries_at(now).await.unwrap(), PROMOTE_BATCH + 7);
        assert_eq!(queue.stats().await.unwrap().scheduled_retries, 0);
    }

    #[tokio::test]
    async fn failed_task_comes_back_after_backoff() {
        let policy = RetryPolicy::exponential(3, Duration::from_secs(5), Duration::from_secs(300));
        let (_, queue) = queue_with(QueueConfig::default().with_retry_policy(policy));

        let id = queue
            .enqueue(&uid("j1"), "/tmp/a.pdf", serde_json::json!({}), 0)
            .await
            .unwrap();
        let task = queue.dequeue(NO_WAIT).await.unwrap().unwrap();
        assert_eq!(task.file_path, "/tmp/a.pdf");
        assert_eq!(task.retries, 0);

        queue.mark_processing(&id).await.unwrap();
        assert!(queue.mark_failed(&id, "boom", true).await.unwrap());
        assert_eq!(queue.get_task(&id).await.unwrap().unwrap().retries, 1);

        // Not yet due.
        assert_eq!(queue.process_retries().await.unwrap(), 0);
        assert!(queue.dequeue(NO_WAIT).await.unwrap().is_none());

        let after_backoff = Utc::now() + chrono::Duration::seconds(11);
        assert_eq!(queue.process_retries_at(after_backoff).await.unwrap(), 1);
        let again = queue.dequeue(NO_WAIT).await.unwrap().unwrap();
        assert_eq!(again.task_id, id);
        assert_eq!(again.retries, 1);
    }

    async fn failed_once(queue: &TaskQueue) -> TaskId {
        let id = queue
            .enqueue(&uid("j1"), "/tmp/a.pdf", serde_json::json!({}), 0)
            .await
            .unwrap();
        queue.dequeue(NO_WAIT).await.unwrap().unwrap();
        queue.mark_processing(&id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn failed_promotion_push_keeps_the_retry_entry() {
        let backend = FaultyBackend::arc(InMemoryBackend::arc());
        let queue = TaskQueue::new(backend.clone(), QueueConfig::default());
        let id = failed_once(&queue).await;
        assert!(queue.mark_failed(&id, "boom", true).await.unwrap());

        let later = Utc::now() + chrono::Duration::hours(1);
        backend.fail_next(Op::Rpush, 1);
        assert!(queue.process_retries_at(later).await.unwrap_err().is_transient());
        assert!(queue.retry_schedule().contains(&id).await.unwrap());

        assert_eq!(queue.process_retries_at(later).await.unwrap(), 1);
        assert_eq!(queue.dequeue(NO_WAIT).await.unwrap().unwrap().task_id, id);
        assert_eq!(queue.stats().await.unwrap().scheduled_retries, 0);
    }

    #[tokio::test]
    async fn failed_release_leaves_a_duplicate_not_a_gap() {
        let backend = FaultyBackend::arc(InMemoryBackend::arc());
        let queue = TaskQueue::new(backend.clone(), QueueConfig::default());
        let id = failed_once(&queue).await;
        assert!(queue.mark_failed(&id, "boom", true).await.unwrap());

        let later = Utc::now() + chrono::Duration::hours(1);
        backend.fail_next(Op::Zrem, 1);
        assert!(queue.process_retries_at(later).await.is_err());
        assert_eq!(queue.process_retries_at(later).await.unwrap(), 1);

        // Pushed twice; both copies name the same record.
        for _ in 0..2 {
            assert_eq!(queue.dequeue(NO_WAIT).await.unwrap().unwrap().task_id, id);
        }
        assert!(queue.dequeue(NO_WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_retry_scheduling_changes_nothing() {
        let backend = FaultyBackend::arc(InMemoryBackend::arc());
        let queue = TaskQueue::new(backend.clone(), QueueConfig::default());
        let id = failed_once(&queue).await;

        backend.fail_next(Op::Zadd, 1);
        assert!(queue.mark_failed(&id, "boom", true).await.unwrap_err().is_transient());
        let task = queue.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.retries, 0);
        assert_eq!(queue.stats().await.unwrap().active_tasks, 1);

        // A repeated call applies the failure exactly once.
        assert!(queue.mark_failed(&id, "boom", true).await.unwrap());
        assert_eq!(queue.get_task(&id).await.unwrap().unwrap().retries, 1);
        assert!(queue.retry_schedule().contains(&id).await.unwrap());
        assert_eq!(queue.stats().await.unwrap().active_tasks, 0);
    }

    #[tokio::test]
    async fn failed_active_removal_keeps_the_retry_entry() {
        let backend = FaultyBackend::arc(InMemoryBackend::arc());
        let queue = TaskQueue::new(backend.clone(), QueueConfig::default());
        let id = failed_once(&queue).await;

        backend.fail_next(Op::Srem, 1);
        assert!(queue.mark_failed(&id, "boom", true).await.is_err());
        assert!(queue.retry_schedule().contains(&id).await.unwrap());
        assert_eq!(queue.cleanup_expired_tasks(Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cleanup_expired_tasks_only_removes_floating_records() {
        let (backend, queue) = queue();
        let keys = queue.config().keys.clone();

        let queued = queue.enqueue(&uid("queued"), "/f", serde_json::json!({}), 0).await.unwrap();

        let floating = queue.enqueue(&uid("floating"), "/f", serde_json::json!({}), 0).await.unwrap();
        let running = queue.enqueue(&uid("running"), "/f", serde_json::json!({}), 0).await.unwrap();
        let failed = queue.enqueue(&uid("failed"), "/f", serde_json::json!({}), 0).await.unwrap();
        for id in [floating, running, failed] {
            backend.lrem(&keys.normal_lane(), &id.to_string()).await.unwrap();
        }
        queue.mark_processing(&running).await.unwrap();
        queue.mark_failed(&failed, "x", false).await.unwrap();

        let broken = TaskId::new();
        backend
            .hset(&keys.task(&broken), &[("status".into(), "??".into())], None)
            .await
            .unwrap();

        let sweep = queue.sweep_floating_tasks(Duration::ZERO).await.unwrap();
        assert_eq!(sweep.removed(), 2);
        assert_eq!(sweep.malformed, 1);
        assert_eq!(sweep.orphaned.len(), 1);
        assert_eq!(sweep.orphaned[0].task_id, floating);
        assert_eq!(sweep.orphaned[0].job_uid, uid("floating"));
        assert!(queue.get_task(&floating).await.unwrap().is_none());
        assert!(!backend.exists(&keys.task(&broken)).await.unwrap());
        for kept in [queued, running, failed] {
            assert!(queue.get_task(&kept).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn cleanup_expired_tasks_respects_max_age() {
        let (backend, queue) = queue();
        let keys = queue.config().keys.clone();
        let id = queue.enqueue(&uid("fresh"), "/f", serde_json::json!({}), 0).await.unwrap();
        backend.lrem(&keys.normal_lane(), &id.to_string()).await.unwrap();

        assert_eq!(
            queue.cleanup_expired_tasks(Duration::from_secs(3600)).await.unwrap(),
            0
        );
        assert!(queue.get_task(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stats_count_every_structure() {
        let (backend, queue) = queue();
        let keys = queue.config().keys.clone();
        queue.enqueue(&uid("a"), "/f", serde_json::json!({}), 1).await.unwrap();
        queue.enqueue(&uid("b"), "/f", serde_json::json!({}), 0).await.unwrap();
        let c = queue.enqueue(&uid("c"), "/f", serde_json::json!({}), 0).await.unwrap();
        backend.lrem(&keys.normal_lane(), &c.to_string()).await.unwrap();
        queue.mark_processing(&c).await.unwrap();
        backend.rpush(&keys.cleanup(), "{}").await.unwrap();

        assert_eq!(
            queue.stats().await.unwrap(),
            QueueStats {
                queue_length: 2,
                priority_length: 1,
                cleanup_queue_length: 1,
                scheduled_retries: 0,
                active_tasks: 1,
            }
        );
    }
}
