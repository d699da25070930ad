//! `resumeflow-worker`: queue consumption, retry promotion, deferred cleanup
//! and the process lifecycle tying them together.

pub mod cleanup;
pub mod http_processor;
pub mod lifecycle;
pub mod processor;
pub mod retry_pump;
pub mod settings;
pub mod task_gc;
pub mod worker;

pub use cleanup::{
    CleanupConfig, CleanupError, CleanupPump, CleanupReport, HttpResourceCleaner, LocalFileStore,
    ResourceCleaner,
};
pub use http_processor::HttpProcessor;
pub use lifecycle::{Shutdown, ShutdownState, Supervisor, run_periodic, spawn_signal_listener};
pub use processor::{ProcessingError, ProcessingOutput, Processor};
pub use retry_pump::RetryPump;
pub use settings::{Cli, Settings, SettingsError};
pub use task_gc::TaskGc;
pub use worker::{TaskOutcome, Worker, WorkerConfig, WorkerReport};
