//! Upload-then-poll OCR API.
//!
//! ```text
//! POST {base}/upload   multipart: file=<pdf>, email=<account>
//!                      → 200 {"tempfile": "<token>"}
//! POST {base}/result   form: tempfile=<token>
//!                      → 200 "working" | "false" | <recognised text>
//! ```
//!
//! `"false"` means the server no longer knows the token: the job expired or
//! its result was already fetched once.

use super::{JobToken, PollSchedule, PollStatus, Recognition, RecognitionBackend, Submission};
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

pub struct PollingApiBackend {
    client: reqwest::Client,
    base_url: String,
    email: String,
    schedule: PollSchedule,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    tempfile: Option<String>,
}

impl PollingApiBackend {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        email: &str,
        schedule: PollSchedule,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            schedule,
        }
    }
}

#[async_trait]
impl RecognitionBackend for PollingApiBackend {
    fn name(&self) -> &str {
        "polling_api"
    }

    async fn submit(&self, document: &Path) -> Result<Submission, BackendError> {
        let bytes = tokio::fs::read(document).await?;
        let file_name = document
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.pdf".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("application/pdf")
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        let form = Form::new().part("file", part).text("email", self.email.clone());

        info!("Uploading {} to OCR API...", file_name);
        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
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

        let upload: UploadResponse = response.json().await?;
        match upload.tempfile.filter(|t| !t.is_empty()) {
            Some(token) => Ok(Submission::Pending(JobToken::new(token))),
            None => Err(BackendError::Protocol("upload response missing tempfile".into())),
        }
    }

    async fn poll(&self, token: &JobToken) -> Result<PollStatus, BackendError> {
        let response = self
            .client
            .post(format!("{}/result", self.base_url))
            .form(&[("tempfile", token.as_str())])
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
        Ok(classify_result_body(response.text().await?))
    }

    fn schedule(&self) -> PollSchedule {
        self.schedule
    }
}

fn classify_result_body(body: String) -> PollStatus {
    match body.trim() {
        "working" => PollStatus::Working,
        "false" => PollStatus::NotFound,
        _ => PollStatus::Ready(Recognition::text(body)),
    }
}
