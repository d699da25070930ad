//! Time-ordered retry schedule (`retry:scheduled` sorted set).
//!
//! Members are task ids, scores are the unix timestamp (seconds, millisecond
//! precision) at which the task may run again.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use resumeflow_core::TaskId;

use crate::backend::Backend;
use crate::error::QueueResult;
use crate::keys::KeySpace;

fn score(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

fn from_score(score: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt((score * 1000.0).round() as i64).single()
}

#[derive(Debug, Clone)]
pub struct RetrySchedule {
    backend: Arc<dyn Backend>,
    key: String,
}

impl RetrySchedule {
    pub fn new(backend: Arc<dyn Backend>, keys: &KeySpace) -> Self {
        Self {
            backend,
            key: keys.retries(),
        }
    }

    /// Insert (or move) an entry.
    pub async fn schedule(&self, task_id: &TaskId, ready_at: DateTime<Utc>) -> QueueResult<()> {
        self.backend
            .zadd(&self.key, &task_id.to_string(), score(ready_at))
            .await?;
        Ok(())
    }

    /// Raw members due at `now`, earliest first.
    pub(crate) async fn due(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<String>> {
        Ok(self
            .backend
            .zrange_by_score(&self.key, score(now), limit)
            .await?)
    }

    /// Current raw score of a member.
    pub(crate) async fn score_of(&self, member: &str) -> QueueResult<Option<f64>> {
        Ok(self.backend.zscore(&self.key, member).await?)
    }

    /// Remove a member that was already handed to a lane.
    ///
    /// Only removes it while the score is still `seen`: an entry rescheduled in
    /// the meantime belongs to a newer attempt and stays.
    pub(crate) async fn release(&self, member: &str, seen: f64) -> QueueResult<bool> {
        if self.score_of(member).await? != Some(seen) {
            return Ok(false);
        }
        self.remove(member).await
    }

    /// Remove an entry; `true` only for the caller that actually removed it.
    pub(crate) async fn remove(&self, member: &str) -> QueueResult<bool> {
        Ok(self.backend.zrem(&self.key, member).await?)
    }

    pub async fn cancel(&self, task_id: &TaskId) -> QueueResult<bool> {
        self.remove(&task_id.to_string()).await
    }

    pub async fn ready_at(&self, task_id: &TaskId) -> QueueResult<Option<DateTime<Utc>>> {
        let score = self.backend.zscore(&self.key, &task_id.to_string()).await?;
        Ok(score.and_then(from_score))
    }

    pub async fn contains(&self, task_id: &TaskId) -> QueueResult<bool> {
        Ok(self.ready_at(task_id).await?.is_some())
    }

    pub async fn len(&self) -> QueueResult<u64> {
        Ok(self.backend.zcard(&self.key).await?)
    }
}
