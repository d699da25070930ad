//! The external processing step a worker delegates each task to.

use std::any::Any;

use serde_json::Value as JsonValue;
use thiserror::Error;

use resumeflow_core::JobUid;

/// What a successful processing call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingOutput {
    /// Structured result stored on the task and the job
    pub result: JsonValue,
    /// Where the full result can be fetched, if published elsewhere
    pub result_url: Option<String>,
}

impl ProcessingOutput {
    pub fn new(result: JsonValue) -> Self {
        Self {
            result,
            result_url: None,
        }
    }

    pub fn with_result_url(mut self, url: impl Into<String>) -> Self {
        self.result_url = Some(url.into());
        self
    }
}

/// Failure raised by a [`Processor`].
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The document could not be processed; retrying may help.
    #[error("processing failed: {0}")]
    Failed(String),

    /// The processing backend was unreachable or overloaded.
    #[error("processor unavailable: {0}")]
    Unavailable(String),

    /// The processor panicked; caught at the task boundary.
    #[error("processor panicked: {0}")]
    Panicked(String),
}

impl ProcessingError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(msg)
    }
}

/// Parses/structures one uploaded document.
///
/// Calls may be slow and may fail or panic; the worker contains both at the
/// task boundary. Implementations must tolerate repeated calls for the same
/// job (delivery is at-least-once).
#[async_trait::async_trait]
pub trait Processor: Send + Sync + 'static {
    async fn process(
        &self,
        job_uid: &JobUid,
        file_path: &str,
        payload: &JsonValue,
    ) -> Result<ProcessingOutput, ProcessingError>;
}
