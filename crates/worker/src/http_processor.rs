//! [`Processor`] backed by a remote document-processing service.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value as JsonValue;

use resumeflow_core::JobUid;

use crate::processor::{ProcessingError, ProcessingOutput, Processor};

#[derive(Debug, Serialize)]
struct ProcessRequest<'a> {
    job_uid: &'a JobUid,
    file_path: &'a str,
    payload: &'a JsonValue,
}

/// POSTs `{job_uid, file_path, payload}` to `endpoint`; the JSON response body
/// is the result. A string `result_url` in the body is lifted out.
#[derive(Debug, Clone)]
pub struct HttpProcessor {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpProcessor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

fn classify(status: StatusCode, body: &str) -> ProcessingError {
    let msg = format!("{status}: {}", body.chars().take(200).collect::<String>());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ProcessingError::Unavailable(msg)
    } else {
        ProcessingError::Failed(msg)
    }
}

fn into_output(body: JsonValue) -> ProcessingOutput {
    let result_url = body
        .get("result_url")
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    ProcessingOutput {
        result: body,
        result_url,
    }
}

#[async_trait::async_trait]
impl Processor for HttpProcessor {
    async fn process(
        &self,
        job_uid: &JobUid,
        file_path: &str,
        payload: &JsonValue,
    ) -> Result<ProcessingOutput, ProcessingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ProcessRequest {
                job_uid,
                file_path,
                payload,
            })
            .send()
            .await
            .map_err(|e| ProcessingError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| ProcessingError::failed(format!("invalid response body: {e}")))?;
        Ok(into_output(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_unavailable_client_errors_are_failures() {
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, "upstream"),
            ProcessingError::Unavailable(_)
        ));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, ""),
            ProcessingError::Unavailable(_)
        ));
        assert!(matches!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, "not a resume"),
            ProcessingError::Failed(msg) if msg.contains("not a resume")
        ));
    }

    #[test]
    fn result_url_is_lifted_from_the_body() {
        let output = into_output(serde_json::json!({"summary": "ok", "result_url": "/r/1"}));
        assert_eq!(output.result_url.as_deref(), Some("/r/1"));
        assert_eq!(output.result["summary"], "ok");

        assert_eq!(into_output(serde_json::json!({"result_url": 5})).result_url, None);
    }
}
