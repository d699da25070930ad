//! Infrastructure layer: backing store, queue structures, job records.
//!
//! Every component takes an explicit `Arc<dyn Backend>` and [`QueueConfig`];
//! there is no process-global client, so several independent queues can live
//! in one process (and one store, given distinct key prefixes).

pub mod backend;
mod codec;
pub mod cleanup_queue;
pub mod config;
pub mod error;
pub mod job_store;
pub mod keys;
pub mod retry_schedule;
pub mod submit;
pub mod task_queue;
pub mod task_store;

pub use backend::{Backend, InMemoryBackend};
#[cfg(feature = "redis")]
pub use backend::RedisBackend;
pub use cleanup_queue::{CleanupEntry, CleanupQueue, PendingCleanup};
pub use config::QueueConfig;
pub use error::{QueueError, QueueResult, StoreError, StoreResult};
pub use job_store::JobStore;
pub use keys::KeySpace;
pub use retry_schedule::RetrySchedule;
pub use submit::Submitter;
pub use task_queue::{FloatingSweep, QueueStats, TaskQueue};
pub use task_store::TaskStore;
