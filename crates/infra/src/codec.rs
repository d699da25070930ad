//! Hash-field encoding for task and job records.
//!
//! Records are stored as flat string maps; this is the only place that knows
//! the field names. Timestamps are RFC 3339, payloads and results are JSON.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use resumeflow_core::{Job, JobStatus, JobUid, QueuedTask, TaskId, TaskStatus};

use crate::error::{QueueError, QueueResult};

pub(crate) type Fields = Vec<(String, String)>;

fn push(fields: &mut Fields, name: &str, value: impl Into<String>) {
    fields.push((name.to_string(), value.into()));
}

fn push_opt(fields: &mut Fields, name: &str, value: Option<String>) {
    if let Some(value) = value {
        push(fields, name, value);
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

/// Changed task fields, written as one single-key hash update.
#[derive(Debug, Clone, Default)]
pub(crate) struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub retries: Option<u32>,
    pub last_error: Option<String>,
    pub retry_at: Option<DateTime<Utc>>,
    pub result: Option<JsonValue>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn encode(&self) -> QueueResult<Fields> {
        let mut fields = Fields::new();
        push_opt(&mut fields, "status", self.status.map(|s| s.as_str().to_string()));
        push_opt(&mut fields, "retries", self.retries.map(|r| r.to_string()));
        push_opt(&mut fields, "last_error", self.last_error.clone());
        push_opt(&mut fields, "retry_at", self.retry_at.map(ts));
        if let Some(result) = &self.result {
            push(&mut fields, "result", serde_json::to_string(result)?);
        }
        push_opt(&mut fields, "completed_at", self.completed_at.map(ts));
        push_opt(&mut fields, "failed_at", self.failed_at.map(ts));
        Ok(fields)
    }
}

pub(crate) fn encode_task(task: &QueuedTask) -> QueueResult<Fields> {
    let mut fields = Fields::new();
    push(&mut fields, "task_id", task.task_id.to_string());
    push(&mut fields, "job_uid", task.job_uid.as_str());
    push(&mut fields, "file_path", task.file_path.clone());
    push(&mut fields, "payload", serde_json::to_string(&task.payload)?);
    push(&mut fields, "priority", task.priority.to_string());
    push(&mut fields, "enqueued_at", ts(task.enqueued_at));
    push(&mut fields, "max_retries", task.max_retries.to_string());
    fields.extend(
        TaskPatch {
            status: Some(task.status),
            retries: Some(task.retries),
            last_error: task.last_error.clone(),
            retry_at: task.retry_at,
            result: task.result.clone(),
            completed_at: task.completed_at,
            failed_at: task.failed_at,
        }
        .encode()?,
    );
    Ok(fields)
}

/// Typed view over a raw hash, reporting decode failures against its key.
struct Record<'a> {
    key: &'a str,
    fields: &'a HashMap<String, String>,
}

impl<'a> Record<'a> {
    fn required(&self, name: &str) -> QueueResult<&'a str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| QueueError::malformed(self.key, format!("missing field {name}")))
    }

    fn optional(&self, name: &str) -> Option<&'a str> {
        self.fields.get(name).map(String::as_str)
    }

    fn parse<T: FromStr>(&self, name: &str, raw: &str) -> QueueResult<T>
    where
        T::Err: core::fmt::Display,
    {
        raw.parse::<T>()
            .map_err(|e| QueueError::malformed(self.key, format!("field {name}: {e}")))
    }

    fn field<T: FromStr>(&self, name: &str) -> QueueResult<T>
    where
        T::Err: core::fmt::Display,
    {
        self.parse(name, self.required(name)?)
    }

    fn optional_field<T: FromStr>(&self, name: &str) -> QueueResult<Option<T>>
    where
        T::Err: core::fmt::Display,
    {
        self.optional(name).map(|raw| self.parse(name, raw)).transpose()
    }

    fn time(&self, name: &str) -> QueueResult<DateTime<Utc>> {
        self.field::<DateTime<Utc>>(name)
    }

    fn optional_time(&self, name: &str) -> QueueResult<Option<DateTime<Utc>>> {
        self.optional_field::<DateTime<Utc>>(name)
    }

    fn json(&self, name: &str, raw: &str) -> QueueResult<JsonValue> {
        serde_json::from_str(raw)
            .map_err(|e| QueueError::malformed(self.key, format!("field {name}: {e}")))
    }

    fn optional_json(&self, name: &str) -> QueueResult<Option<JsonValue>> {
        self.optional(name).map(|raw| self.json(name, raw)).transpose()
    }
}

pub(crate) fn decode_task(key: &str, fields: &HashMap<String, String>) -> QueueResult<QueuedTask> {
    let record = Record { key, fields };
    Ok(QueuedTask {
        task_id: record.field::<TaskId>("task_id")?,
        job_uid: record.field::<JobUid>("job_uid")?,
        file_path: record.required("file_path")?.to_string(),
        payload: record.json("payload", record.required("payload")?)?,
        priority: record.field("priority")?,
        enqueued_at: record.time("enqueued_at")?,
        retries: record.field("retries")?,
        max_retries: record.field("max_retries")?,
        status: record.field::<TaskStatus>("status")?,
        last_error: record.optional("last_error").map(str::to_string),
        retry_at: record.optional_time("retry_at")?,
        result: record.optional_json("result")?,
        completed_at: record.optional_time("completed_at")?,
        failed_at: record.optional_time("failed_at")?,
    })
}

pub(crate) fn encode_job(job: &Job) -> QueueResult<Fields> {
    let mut fields = Fields::new();
    push(&mut fields, "uid", job.uid.as_str());
    push(&mut fields, "status", job.status.as_str());
    push(&mut fields, "file_path", job.file_path.clone());
    push(&mut fields, "created_at", ts(job.created_at));
    push(&mut fields, "updated_at", ts(job.updated_at));
    push_opt(&mut fields, "completed_at", job.completed_at.map(ts));
    if let Some(result) = &job.result {
        push(&mut fields, "result", serde_json::to_string(result)?);
    }
    push_opt(&mut fields, "result_url", job.result_url.clone());
    push_opt(&mut fields, "error", job.error.clone());
    Ok(fields)
}

pub(crate) fn decode_job(key: &str, fields: &HashMap<String, String>) -> QueueResult<Job> {
    let record = Record { key, fields };
    Ok(Job {
        uid: record.field::<JobUid>("uid")?,
        status: record.field::<JobStatus>("status")?,
        file_path: record.required("file_path")?.to_string(),
        created_at: record.time("created_at")?,
        updated_at: record.time("updated_at")?,
        completed_at: record.optional_time("completed_at")?,
        result: record.optional_json("result")?,
        result_url: record.optional("result_url").map(str::to_string),
        error: record.optional("error").map(str::to_string),
    })
}
