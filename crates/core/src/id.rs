//! Strongly-typed identifiers for jobs and tasks.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Longest accepted job uid.
pub const MAX_JOB_UID_LEN: usize = 128;

/// Identifier of one execution attempt record in the task store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for TaskId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for TaskId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("TaskId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// User-facing job identifier.
///
/// Job uids end up inside store keys (`job:<uid>`) and upload directory names,
/// so they are restricted to ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobUid(String);

impl JobUid {
    /// Generate a fresh uid (simple-formatted UUIDv7).
    pub fn new() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Validate and wrap a caller-supplied uid.
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::invalid_id("JobUid: empty"));
        }
        if value.len() > MAX_JOB_UID_LEN {
            return Err(DomainError::invalid_id(format!(
                "JobUid: longer than {MAX_JOB_UID_LEN} characters"
            )));
        }
        if let Some(bad) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(DomainError::invalid_id(format!(
                "JobUid: unexpected character {bad:?}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobUid {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for JobUid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobUid {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobUid {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<JobUid> for String {
    fn from(value: JobUid) -> Self {
        value.0
    }
}

impl AsRef<str> for JobUid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_round_trips_through_display() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn task_id_rejects_garbage() {
        assert!(matches!(
            "not-a-uuid".parse::<TaskId>(),
            Err(DomainError::InvalidId(_))
        ));
    }

    #[test]
    fn generated_job_uids_are_valid() {
        let uid = JobUid::new();
        assert_eq!(JobUid::parse(uid.as_str()).unwrap(), uid);
    }

    #[test]
    fn job_uid_accepts_simple_names() {
        assert_eq!(JobUid::parse("j1").unwrap().as_str(), "j1");
        assert!(JobUid::parse("resume_2024-01").is_ok());
    }

    #[test]
    fn job_uid_rejects_path_and_key_separators() {
        assert!(JobUid::parse("").is_err());
        assert!(JobUid::parse("../etc").is_err());
        assert!(JobUid::parse("a/b").is_err());
        assert!(JobUid::parse("job:1").is_err());
        assert!(JobUid::parse("x".repeat(MAX_JOB_UID_LEN + 1)).is_err());
    }

    #[test]
    fn job_uid_deserialization_validates() {
        let ok: JobUid = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<JobUid>("\"a b\"").is_err());
    }
}
