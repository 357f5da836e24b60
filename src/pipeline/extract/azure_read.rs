//! Azure Computer Vision Read API (v3.2).
//!
//! The analyze call answers `202 Accepted` with an `Operation-Location`
//! header; that URL is the job token and is polled with GET until the
//! operation leaves `notStarted`/`running`.

use super::{JobToken, PollSchedule, PollStatus, Recognition, RecognitionBackend, Submission};
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

pub struct AzureReadBackend {
    client: reqwest::Client,
    endpoint: String,
    key: String,
    schedule: PollSchedule,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    read_results: Vec<ReadResult>,
}

#[derive(Debug, Deserialize)]
struct ReadResult {
    #[serde(default)]
    lines: Vec<Line>,
}

#[derive(Debug, Deserialize)]
struct Line {
    text: String,
}

impl AzureReadBackend {
    pub fn new(client: reqwest::Client, endpoint: &str, key: &str, schedule: PollSchedule) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key: key.to_string(),
            schedule,
        }
    }

    fn analyze_url(&self) -> String {
        format!("{}/vision/v3.2/read/analyze", self.endpoint)
    }
}

#[async_trait]
impl RecognitionBackend for AzureReadBackend {
    fn name(&self) -> &str {
        "azure_read"
    }

    async fn submit(&self, document: &Path) -> Result<Submission, BackendError> {
        let bytes = tokio::fs::read(document).await?;
        let response = self
            .client
            .post(self.analyze_url())
            .header(KEY_HEADER, &self.key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                code: status.as_u16(),
                body,
            });
        }

        response
            .headers()
            .get("Operation-Location")
            .and_then(|v| v.to_str().ok())
            .map(|loc| Submission::Pending(JobToken::new(loc)))
            .ok_or_else(|| {
                BackendError::Protocol("response missing Operation-Location header".into())
            })
    }

    async fn poll(&self, token: &JobToken) -> Result<PollStatus, BackendError> {
        let response = self
            .client
            .get(token.as_str())
            .header(KEY_HEADER, &self.key)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(PollStatus::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let operation: ReadOperation = response.json().await?;
        classify_operation(operation)
    }

    fn schedule(&self) -> PollSchedule {
        self.schedule
    }
}

fn classify_operation(op: ReadOperation) -> Result<PollStatus, BackendError> {
    match op.status.as_str() {
        "notStarted" | "running" => Ok(PollStatus::Working),
        "succeeded" => {
            let text = op
                .analyze_result
                .unwrap_or_default()
                .read_results
                .iter()
                .flat_map(|page| page.lines.iter().map(|l| l.text.as_str()))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(PollStatus::Ready(Recognition::text(text)))
        }
        other => Err(BackendError::Protocol(format!(
            "Azure Vision OCR failed with status: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<PollStatus, BackendError> {
        classify_operation(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn running_states_keep_polling() {
        assert_eq!(parse(r#"{"status":"notStarted"}"#).unwrap(), PollStatus::Working);
        assert_eq!(parse(r#"{"status":"running"}"#).unwrap(), PollStatus::Working);
    }

    #[test]
    fn succeeded_joins_lines_across_pages() {
        let json = r#"{
            "status": "succeeded",
            "analyzeResult": {
                "readResults": [
                    {"page": 1, "lines": [{"text": "Invoice"}, {"text": "No. 42"}]},
                    {"page": 2, "lines": [{"text": "Total 1,000"}]}
                ]
            }
        }"#;
        assert_eq!(
            parse(json).unwrap(),
            PollStatus::Ready(Recognition::text("Invoice\nNo. 42\nTotal 1,000"))
        );
    }

    #[test]
    fn failed_operation_is_protocol_error() {
        let err = parse(r#"{"status":"failed"}"#).unwrap_err();
        assert!(err.to_string().contains("failed"));
    }

    #[test]
    fn analyze_url_is_built_from_endpoint() {
        let b = AzureReadBackend::new(
            reqwest::Client::new(),
            "https://res.cognitiveservices.azure.com/",
            "k",
            PollSchedule::default(),
        );
        assert_eq!(
            b.analyze_url(),
            "https://res.cognitiveservices.azure.com/vision/v3.2/read/analyze"
        );
    }
}
