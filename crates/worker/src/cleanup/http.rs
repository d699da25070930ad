//! Deletion of per-job rows in a remote store (graph or vector service).

use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use resumeflow_core::JobUid;

use super::{CleanupError, ResourceCleaner};

/// Issues `DELETE {base_url}/jobs/{job_uid}`. A 404 counts as already deleted.
#[derive(Debug, Clone)]
pub struct HttpResourceCleaner {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpResourceCleaner {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CleanupError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn job_url(&self, job_uid: &JobUid) -> String {
        format!("{}/jobs/{}", self.base_url, job_uid)
    }
}

#[async_trait::async_trait]
impl ResourceCleaner for HttpResourceCleaner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn delete_job_resources(&self, job_uid: &JobUid) -> Result<(), CleanupError> {
        let url = self.job_url(job_uid);
        let status = self.client.delete(&url).send().await?.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!(target_store = %self.name, job_uid = %job_uid, %status, "remote resources deleted");
            Ok(())
        } else {
            Err(CleanupError::Status {
                target: self.name.clone(),
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_url_normalises_trailing_slash() {
        let cleaner =
            HttpResourceCleaner::new("graph", "http://graph:7474/", Duration::from_secs(5)).unwrap();
        let uid = JobUid::parse("j-42").unwrap();
        assert_eq!(cleaner.job_url(&uid), "http://graph:7474/jobs/j-42");
        assert_eq!(cleaner.name(), "graph");
    }
}
