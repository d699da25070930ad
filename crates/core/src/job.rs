//! The user-facing job record and its status lifecycle.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::JobUid;

/// Job processing status.
///
/// Transitions are monotonic: `Pending -> Processing -> {Completed, Failed}`.
/// A job can only complete after it was picked up, but it can fail straight
/// from `Pending` (a submission whose enqueue failed). A non-terminal status
/// may be re-applied (a retried attempt marks the job `Processing` again);
/// terminal statuses are final.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Completed) => false,
            (from, to) if *from == to => !from.is_terminal(),
            (from, to) => to.rank() > from.rank(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// A user-facing processing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub uid: JobUid,
    pub status: JobStatus,
    /// Durable location of the uploaded document
    pub file_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque structured output of the processor
    pub result: Option<JsonValue>,
    pub result_url: Option<String>,
    pub error: Option<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(uid: JobUid, file_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uid,
            status: JobStatus::Pending,
            file_path: file_path.into(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            result: None,
            result_url: None,
            error: None,
        }
    }

    /// Apply an update and touch `updated_at`.
    ///
    /// Rejects non-monotonic status changes without modifying the job.
    pub fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(next) = update.status {
            if !self.status.can_transition_to(next) {
                return Err(DomainError::invalid_transition(self.status, next));
            }
            if next.is_terminal() {
                self.completed_at = Some(now);
            }
            self.status = next;
        }
        if let Some(result) = update.result {
            self.result = Some(result);
        }
        if let Some(url) = update.result_url {
            self.result_url = Some(url);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.updated_at = now;
        Ok(())
    }

    /// The externally visible projection of this job.
    pub fn view(&self) -> JobView {
        JobView {
            uid: self.uid.clone(),
            status: self.status,
            error: self.error.clone(),
        }
    }
}

/// A set of field changes applied atomically to a job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub result: Option<JsonValue>,
    pub result_url: Option<String>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn completed(result: JsonValue, result_url: Option<String>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            result: Some(result),
            result_url,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// What status queries expose: status and error string, nothing internal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobView {
    pub uid: JobUid,
    pub status: JobStatus,
    pub error: Option<String>,
}
