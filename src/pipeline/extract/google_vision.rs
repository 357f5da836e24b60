//! Google Cloud Vision `images:annotate` with `DOCUMENT_TEXT_DETECTION`.
//!
//! Synchronous: every page image goes out in one batch request and the
//! answer carries the text, so the job completes at submission. Confidence
//! is the mean of all word confidences across pages.

use super::pages::page_images;
use super::{Recognition, RecognitionBackend, Submission};
use crate::error::BackendError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

/// Images per annotate request accepted by the API.
const MAX_BATCH: usize = 16;

pub struct GoogleVisionBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ImageResponse {
    full_text_annotation: Option<TextAnnotation>,
    error: Option<ApiStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiStatus {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TextAnnotation {
    text: String,
    pages: Vec<AnnotatedPage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnnotatedPage {
    blocks: Vec<Block>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Block {
    paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Paragraph {
    words: Vec<Word>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Word {
    confidence: Option<f32>,
}

impl GoogleVisionBackend {
    pub fn new(client: reqwest::Client, endpoint: &str, api_key: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn annotate(&self, pages: &[Vec<u8>]) -> Result<Vec<ImageResponse>, BackendError> {
        let requests: Vec<_> = pages
            .iter()
            .map(|jpeg| {
                json!({
                    "image": { "content": STANDARD.encode(jpeg) },
                    "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }],
                })
            })
            .collect();

        let response = self
            .client
            .post(format!("{}/v1/images:annotate", self.endpoint))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "requests": requests }))
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
        let parsed: AnnotateResponse = response.json().await?;
        Ok(parsed.responses)
    }
}

#[async_trait]
impl RecognitionBackend for GoogleVisionBackend {
    fn name(&self) -> &str {
        "google_vision"
    }

    async fn submit(&self, document: &Path) -> Result<Submission, BackendError> {
        let pages = page_images(document).await?;
        let mut responses = Vec::with_capacity(pages.len());
        for batch in pages.chunks(MAX_BATCH) {
            responses.extend(self.annotate(batch).await?);
        }
        combine(responses).map(Submission::Complete)
    }
}

fn combine(responses: Vec<ImageResponse>) -> Result<Recognition, BackendError> {
    let mut texts = Vec::new();
    let mut total = 0.0f32;
    let mut words = 0usize;

    for response in responses {
        if let Some(err) = response.error.filter(|e| !e.message.is_empty()) {
            return Err(BackendError::Protocol(format!(
                "Google Vision API error: {}",
                err.message
            )));
        }
        let Some(annotation) = response.full_text_annotation else {
            continue;
        };
        for word in annotation
            .pages
            .iter()
            .flat_map(|p| &p.blocks)
            .flat_map(|b| &b.paragraphs)
            .flat_map(|p| &p.words)
        {
            if let Some(c) = word.confidence {
                total += c;
                words += 1;
            }
        }
        texts.push(annotation.text);
    }

    Ok(Recognition {
        text: texts.join("\n"),
        confidence: (words > 0).then(|| total / words as f32),
    })
}
