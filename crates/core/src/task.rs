//! Queued tasks: one execution attempt chain for a job.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::DomainError;
use crate::id::{JobUid, TaskId};
use crate::retry::RetryPolicy;

/// Task execution status as recorded in the task store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Sitting in a queue lane
    Queued,
    /// Admitted by a worker
    Processing,
    /// Waiting in the retry schedule
    RetryScheduled,
    /// Finished successfully
    Completed,
    /// Exhausted retries (or failed without retry)
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::RetryScheduled => "retry_scheduled",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "retry_scheduled" => Ok(TaskStatus::RetryScheduled),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(DomainError::validation(format!("unknown task status: {other}"))),
        }
    }
}

/// A queued task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub task_id: TaskId,
    pub job_uid: JobUid,
    pub file_path: String,
    /// Parsed input handed to the processor
    pub payload: JsonValue,
    /// `> 0` selects the priority lane
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub retries: u32,
    pub max_retries: u32,
    pub status: TaskStatus,
    pub last_error: Option<String>,
    pub retry_at: Option<DateTime<Utc>>,
    pub result: Option<JsonValue>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// What a failure does to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Retry after `delay`, not before `ready_at`.
    Retry {
        ready_at: DateTime<Utc>,
        delay: Duration,
    },
    /// No retries left (or retry not requested).
    Terminal,
}

impl QueuedTask {
    /// Create a new task with zero retries.
    pub fn new(
        job_uid: JobUid,
        file_path: impl Into<String>,
        payload: JsonValue,
        priority: i32,
        max_retries: u32,
    ) -> Self {
        Self {
            task_id: TaskId::new(),
            job_uid,
            file_path: file_path.into(),
            payload,
            priority,
            enqueued_at: Utc::now(),
            retries: 0,
            max_retries,
            status: TaskStatus::Queued,
            last_error: None,
            retry_at: None,
            result: None,
            completed_at: None,
            failed_at: None,
        }
    }

    pub fn is_priority(&self) -> bool {
        self.priority > 0
    }

    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }

    /// Apply the retry policy to a failed attempt.
    ///
    /// With `retry` set and retries left, bumps `retries` and schedules the next
    /// attempt `policy.delay_for(retries)` from `now`. Otherwise the task becomes
    /// terminally failed. `retries` never exceeds `max_retries`.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        retry: bool,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> FailureDecision {
        let error = error.into();
        if retry && self.can_retry() {
            self.retries += 1;
            let delay = policy.delay_for(self.retries);
            let ready_at = offset(now, delay);
            self.status = TaskStatus::RetryScheduled;
            self.last_error = Some(error);
            self.retry_at = Some(ready_at);
            FailureDecision::Retry { ready_at, delay }
        } else {
            self.status = TaskStatus::Failed;
            self.last_error = Some(error);
            self.failed_at = Some(now);
            FailureDecision::Terminal
        }
    }

    /// Mark the task completed with the processor's result.
    pub fn record_success(&mut self, result: JsonValue, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(now);
    }
}

/// `now + delay`, saturating at the largest representable instant.
pub fn offset(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::exponential(3, Duration::from_secs(5), Duration::from_secs(60))
    }

    fn task() -> QueuedTask {
        QueuedTask::new(
            JobUid::parse("j1").unwrap(),
            "/tmp/a.pdf",
            serde_json::json!({}),
            0,
            3,
        )
    }

    #[test]
    fn failures_retry_until_exhausted() {
        let mut task = task();
        let now = Utc::now();

        for expected in 1..=3 {
            let decision = task.record_failure("boom", true, &policy(), now);
            let FailureDecision::Retry { ready_at, delay } = decision else {
                panic!("expected retry on failure {expected}");
            };
            assert_eq!(task.retries, expected);
            assert_eq!(task.status, TaskStatus::RetryScheduled);
            assert!(ready_at >= now + chrono::Duration::seconds(5));
            assert_eq!(delay, policy().delay_for(expected));
        }

        assert_eq!(
            task.record_failure("boom", true, &policy(), now),
            FailureDecision::Terminal
        );
        assert_eq!(task.retries, 3);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failed_at, Some(now));
    }

    #[test]
    fn failure_without_retry_is_terminal() {
        let mut task = task();
        let decision = task.record_failure("corrupt upload", false, &policy(), Utc::now());
        assert_eq!(decision, FailureDecision::Terminal);
        assert_eq!(task.retries, 0);
        assert_eq!(task.last_error.as_deref(), Some("corrupt upload"));
    }

    #[test]
    fn priority_lane_selection() {
        let mut t = task();
        assert!(!t.is_priority());
        t.priority = 1;
        assert!(t.is_priority());
        t.priority = -1;
        assert!(!t.is_priority());
    }

    #[test]
    fn offset_saturates() {
        let now = Utc::now();
        assert_eq!(offset(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
