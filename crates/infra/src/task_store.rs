//! Keyed task records (`task:<task_id>` hashes) with expiry.

use std::sync::Arc;
use std::time::Duration;

use resumeflow_core::{QueuedTask, TaskId};

use crate::backend::Backend;
use crate::codec::{self, TaskPatch};
use crate::error::{QueueError, QueueResult};
use crate::keys::KeySpace;

#[derive(Debug, Clone)]
pub struct TaskStore {
    backend: Arc<dyn Backend>,
    keys: KeySpace,
}

impl TaskStore {
    pub fn new(backend: Arc<dyn Backend>, keys: KeySpace) -> Self {
        Self { backend, keys }
    }

    /// Write the full record and set its expiry.
    pub async fn put(&self, task: &QueuedTask, ttl: Duration) -> QueueResult<()> {
        let fields = codec::encode_task(task)?;
        self.backend
            .hset(&self.keys.task(&task.task_id), &fields, Some(ttl))
            .await?;
        Ok(())
    }

    /// Load a record; `Ok(None)` when it does not exist (expired or never written).
    pub async fn get(&self, task_id: &TaskId) -> QueueResult<Option<QueuedTask>> {
        let key = self.keys.task(task_id);
        self.get_key(&key).await
    }

    pub(crate) async fn get_key(&self, key: &str) -> QueueResult<Option<QueuedTask>> {
        let fields = self.backend.hgetall(key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        codec::decode_task(key, &fields).map(Some)
    }

    /// Load a record that must exist.
    pub async fn require(&self, task_id: &TaskId) -> QueueResult<QueuedTask> {
        self.get(task_id)
            .await?
            .ok_or(QueueError::TaskNotFound(*task_id))
    }

    /// Atomic multi-field update on one record, optionally resetting its expiry.
    pub(crate) async fn patch(
        &self,
        task_id: &TaskId,
        patch: &TaskPatch,
        ttl: Option<Duration>,
    ) -> QueueResult<()> {
        let fields = patch.encode()?;
        self.backend
            .hset(&self.keys.task(task_id), &fields, ttl)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, task_id: &TaskId) -> QueueResult<bool> {
        Ok(self.backend.del(&self.keys.task(task_id)).await?)
    }

    pub async fn ttl(&self, task_id: &TaskId) -> QueueResult<Option<Duration>> {
        Ok(self.backend.ttl(&self.keys.task(task_id)).await?)
    }

    /// Every stored record key.
    pub(crate) async fn record_keys(&self) -> QueueResult<Vec<String>> {
        Ok(self.backend.scan_prefix(&self.keys.task_prefix()).await?)
    }

    /// Task id encoded in a record key, if the key is well-formed.
    pub(crate) fn id_from_key(&self, key: &str) -> Option<TaskId> {
        key.strip_prefix(&self.keys.task_prefix())?.parse().ok()
    }
}
