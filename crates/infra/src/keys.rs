//! Backing-store key layout.
//!
//! | Key | Structure | Contents |
//! |---|---|---|
//! | `job:<uid>` | hash | job record |
//! | `task:<task_id>` | hash | task record |
//! | `queue:jobs:priority` | list | task ids, priority lane |
//! | `queue:jobs` | list | task ids, normal lane |
//! | `queue:active` | set | task ids between `mark_processing` and their outcome |
//! | `queue:cleanup` | list | serialized cleanup entries |
//! | `retry:scheduled` | sorted set | task id -> ready unix timestamp |
//!
//! Every key is optionally namespaced with `<prefix>:` so several independent
//! queues can share one store.

use resumeflow_core::{JobUid, TaskId};

const JOB: &str = "job:";
const TASK: &str = "task:";
const PRIORITY_LANE: &str = "queue:jobs:priority";
const NORMAL_LANE: &str = "queue:jobs";
const ACTIVE: &str = "queue:active";
const CLEANUP: &str = "queue:cleanup";
const RETRIES: &str = "retry:scheduled";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches(':');
        if prefix.is_empty() {
            Self::default()
        } else {
            Self {
                prefix: format!("{prefix}:"),
            }
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn job(&self, uid: &JobUid) -> String {
        format!("{}{JOB}{uid}", self.prefix)
    }

    pub fn task(&self, task_id: &TaskId) -> String {
        format!("{}{TASK}{task_id}", self.prefix)
    }

    /// Prefix shared by every task record key.
    pub fn task_prefix(&self) -> String {
        self.key(TASK)
    }

    pub fn priority_lane(&self) -> String {
        self.key(PRIORITY_LANE)
    }

    pub fn normal_lane(&self) -> String {
        self.key(NORMAL_LANE)
    }

    pub fn active(&self) -> String {
        self.key(ACTIVE)
    }

    pub fn cleanup(&self) -> String {
        self.key(CLEANUP)
    }

    pub fn retries(&self) -> String {
        self.key(RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_layout_matches_reference_keys() {
        let keys = KeySpace::default();
        let uid = JobUid::parse("j1").unwrap();
        assert_eq!(keys.job(&uid), "job:j1");
        assert_eq!(keys.normal_lane(), "queue:jobs");
        assert_eq!(keys.cleanup(), "queue:cleanup");
        assert_eq!(keys.retries(), "retry:scheduled");
    }

    #[test]
    fn prefix_namespaces_every_key() {
        let keys = KeySpace::new("tenant-a:");
        let task_id = TaskId::new();
        assert_eq!(keys.task(&task_id), format!("tenant-a:task:{task_id}"));
        assert!(keys.task(&task_id).starts_with(&keys.task_prefix()));
        assert_eq!(keys.priority_lane(), "tenant-a:queue:jobs:priority");
    }
}
