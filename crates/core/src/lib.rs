//! `resumeflow-core`: domain building blocks for the processing queue.
//!
//! This crate contains **pure domain** types (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod job;
pub mod retry;
pub mod task;

pub use error::{DomainError, DomainResult};
pub use id::{JobUid, TaskId};
pub use job::{Job, JobStatus, JobUpdate, JobView};
pub use retry::RetryPolicy;
pub use task::{FailureDecision, QueuedTask, TaskStatus};
