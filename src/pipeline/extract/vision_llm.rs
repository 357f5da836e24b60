//! Vision-LLM transcription through edgequake-llm.
//!
//! Each page image is sent as its own chat request; the transcriptions are
//! joined with a blank line. Like Google Vision this is a direct backend:
//! the job completes at submission.
//!
//! Provider resolution, most specific first:
//!
//! 1. `extraction.vision_llm.provider` (+ `model`) from the config file
//! 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` from the environment
//! 3. `OPENAI_API_KEY` present → OpenAI
//! 4. [`ProviderFactory::from_env`] auto-detection

use super::pages::page_images;
use super::{Recognition, RecognitionBackend, Submission};
use crate::config::VisionLlmConfig;
use crate::error::{BackendError, IngestError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// System prompt for page transcription.
pub const TRANSCRIBE_PROMPT: &str = r#"You are an OCR engine. Transcribe ALL text visible in the scanned page image.

Rules:
- Output the text exactly as written, in reading order, preserving line breaks
- Keep the original language and script; do NOT translate
- Do NOT describe the image, add commentary, or wrap the output in code fences
- If the page contains no legible text, output nothing"#;

pub struct VisionLlmBackend {
    provider: Arc<dyn LLMProvider>,
    max_tokens: usize,
}

impl VisionLlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, max_tokens: usize) -> Self {
        Self {
            provider,
            max_tokens,
        }
    }

    pub fn from_config(config: &VisionLlmConfig) -> Result<Self, IngestError> {
        Ok(Self::new(resolve_provider(config)?, config.max_tokens))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(0.1),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

fn build_messages(jpeg: &[u8]) -> Vec<ChatMessage> {
    let image = ImageData::new(STANDARD.encode(jpeg), "image/jpeg").with_detail("high");
    vec![
        ChatMessage::system(TRANSCRIBE_PROMPT),
        ChatMessage::user_with_images("", vec![image]),
    ]
}

#[async_trait]
impl RecognitionBackend for VisionLlmBackend {
    fn name(&self) -> &str {
        "vision_llm"
    }

    async fn submit(&self, document: &Path) -> Result<Submission, BackendError> {
        let pages = page_images(document).await?;
        let options = self.options();
        let mut texts = Vec::with_capacity(pages.len());

        for (idx, jpeg) in pages.iter().enumerate() {
            let response = self
                .provider
                .chat(&build_messages(jpeg), Some(&options))
                .await
                .map_err(|e| BackendError::Transport(e.to_string()))?;
            debug!(
                "Page {}: {} input tokens, {} output tokens",
                idx + 1,
                response.prompt_tokens,
                response.completion_tokens
            );
            let text = response.content.trim();
            if !text.is_empty() {
                texts.push(text.to_string());
            }
        }

        Ok(Submission::Complete(Recognition::text(texts.join("\n\n"))))
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, IngestError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        IngestError::BackendNotConfigured {
            backend: "vision_llm".to_string(),
            hint: format!("provider '{name}': {e}"),
        }
    })
}

fn resolve_provider(config: &VisionLlmConfig) -> Result<Arc<dyn LLMProvider>, IngestError> {
    if let Some(ref name) = config.provider {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider("openai", model);
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| IngestError::BackendNotConfigured {
            backend: "vision_llm".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or extraction.vision_llm.provider.\n\
                Error: {e}"
            ),
        })?;
    Ok(provider)
}
