//! Periodic promotion of due retries back onto the normal lane.

use std::time::Duration;

use tracing::{debug, instrument};

use resumeflow_infra::{QueueResult, TaskQueue};

use crate::lifecycle::{Shutdown, run_periodic};

/// Drives [`TaskQueue::process_retries`] on its own cadence, independent of
/// the consumer's dequeue loop.
///
/// Promotion pushes before it removes the schedule entry, so a store failure
/// can at worst queue a task twice, never drop it. Several pumps may share a
/// store under the same guarantee.
#[derive(Debug, Clone)]
pub struct RetryPump {
    queue: TaskQueue,
    interval: Duration,
}

impl RetryPump {
    pub fn new(queue: TaskQueue, interval: Duration) -> Self {
        Self { queue, interval }
    }

    #[instrument(skip(self), err)]
    pub async fn run_once(&self) -> QueueResult<usize> {
        let promoted = self.queue.process_retries().await?;
        debug!(promoted, "retry pump tick");
        Ok(promoted)
    }

    pub async fn run(self, shutdown: Shutdown) {
        let this = &self;
        run_periodic("retry-pump", self.interval, shutdown, move || async move {
            this.run_once().await.map(drop)
        })
        .await;
    }
}
