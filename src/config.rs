//! Configuration types for the scan watcher.
//!
//! Every knob lives in one [`Config`] tree, deserialised from TOML with a
//! default for each field so a minimal file only names the watched directory
//! and the notification endpoint. Library callers and tests can skip the file
//! entirely and use [`Config::builder`].
//!
//! ```toml
//! [watch]
//! directory = "/srv/scans/inbox"
//!
//! [extraction]
//! backend = "polling_api"
//!
//! [extraction.polling_api]
//! base_url = "https://ocr.example.com/api"
//! email    = "ops@example.com"
//!
//! [notification]
//! webhook_url = "https://hooks.example.com/scans"
//! ```

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete watcher configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub processing: ProcessingConfig,
    pub extraction: ExtractionConfig,
    pub validation: ValidationConfig,
    pub notification: NotificationConfig,
    pub logging: LoggingConfig,
}

/// Where to look for documents and how often.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Root of the watched directory tree. Required.
    pub directory: PathBuf,

    /// Accepted file extensions, case-insensitive. Default: `tif`, `tiff`.
    ///
    /// A leading dot is accepted and ignored, so `".tif"` and `"tif"` match
    /// the same files.
    pub extensions: Vec<String>,

    /// Only files modified within this many minutes are picked up. Default: 10.
    ///
    /// The dedup cache is in-memory, so after a restart this window is the only
    /// thing standing between the watcher and a re-send of every old document
    /// still sitting in the directory.
    pub recency_minutes: u64,

    /// Readiness debounce: size and mtime must be unchanged across this window. Default: 5.
    pub stability_secs: u64,

    /// Sleep between scan cycles in seconds. Default: 600.
    pub scan_interval_secs: u64,

    /// Follow symlinks while walking the tree. Default: false.
    pub follow_symlinks: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
            extensions: vec!["tif".to_string(), "tiff".to_string()],
            recency_minutes: 10,
            stability_secs: 5,
            scan_interval_secs: 600,
            follow_symlinks: false,
        }
    }
}

impl WatchConfig {
    pub fn recency_window(&self) -> Duration {
        Duration::from_secs(self.recency_minutes.saturating_mul(60))
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_secs(self.stability_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

/// Worker pool and temporary-file handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Maximum number of files processed concurrently. Default: 3.
    ///
    /// Each worker spends most of its life asleep (readiness debounce, OCR
    /// poll interval), so the limit protects the recognition backend and the
    /// notification endpoint rather than local CPU.
    pub max_concurrent_files: usize,

    /// Directory receiving converted PDFs. Default: `./temp`.
    ///
    /// Must live outside the watched directory.
    pub temp_directory: PathBuf,

    /// Delete converted PDFs once a file has been processed. Default: true.
    pub cleanup_temp_files: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: 3,
            temp_directory: PathBuf::from("./temp"),
            cleanup_temp_files: true,
        }
    }
}

/// Which recognition backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Upload + poll-by-token HTTP API. (default)
    #[default]
    PollingApi,
    /// Azure Computer Vision Read API (operation handle + status polling).
    AzureRead,
    /// Google Cloud Vision `images:annotate` (synchronous, reports confidence).
    GoogleVision,
    /// Vision LLM via edgequake-llm (synchronous).
    VisionLlm,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::PollingApi => "polling_api",
            BackendKind::AzureRead => "azure_read",
            BackendKind::GoogleVision => "google_vision",
            BackendKind::VisionLlm => "vision_llm",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub backend: BackendKind,

    /// Outer attempts per document. Default: 3.
    ///
    /// Each attempt runs the full submit/poll cycle from scratch; a job token
    /// from a failed attempt is never polled again.
    pub max_attempts: u32,

    /// Base delay between outer attempts, doubled each time. Default: 2000.
    pub retry_delay_ms: u64,

    /// Backends that report confidence warn below this value. Default: 0.7.
    ///
    /// Advisory only: a low-confidence result is still returned.
    pub confidence_threshold: f32,

    /// Per-request HTTP timeout in seconds. Default: 30.
    pub request_timeout_secs: u64,

    pub polling_api: PollingApiConfig,
    pub azure_read: AzureReadConfig,
    pub google_vision: GoogleVisionConfig,
    pub vision_llm: VisionLlmConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            max_attempts: 3,
            retry_delay_ms: 2000,
            confidence_threshold: 0.7,
            request_timeout_secs: 30,
            polling_api: PollingApiConfig::default(),
            azure_read: AzureReadConfig::default(),
            google_vision: GoogleVisionConfig::default(),
            vision_llm: VisionLlmConfig::default(),
        }
    }
}

impl ExtractionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingApiConfig {
    /// Base URL; `/upload` and `/result` are appended.
    pub base_url: Option<String>,
    /// Account e-mail sent with every upload.
    pub email: Option<String>,
    /// Result polls per job before giving up. Default: 30.
    pub max_polls: u32,
    /// Seconds between result polls. Default: 10.
    pub poll_interval_secs: u64,
}

impl Default for PollingApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            email: None,
            max_polls: 30,
            poll_interval_secs: 10,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureReadConfig {
    /// Resource endpoint, e.g. `https://myres.cognitiveservices.azure.com`.
    pub endpoint: Option<String>,
    pub key: Option<String>,
    /// Default: 60.
    pub max_polls: u32,
    /// Default: 1000.
    pub poll_interval_ms: u64,
}

impl Default for AzureReadConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            key: None,
            max_polls: 60,
            poll_interval_ms: 1000,
        }
    }
}

impl fmt::Debug for AzureReadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureReadConfig")
            .field("endpoint", &self.endpoint)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("max_polls", &self.max_polls)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleVisionConfig {
    pub api_key: Option<String>,
    /// Default: `https://vision.googleapis.com`.
    pub endpoint: String,
}

impl Default for GoogleVisionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://vision.googleapis.com".to_string(),
        }
    }
}

impl fmt::Debug for GoogleVisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleVisionConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionLlmConfig {
    /// Provider name (openai, anthropic, gemini, ollama …). Auto-detected when unset.
    pub provider: Option<String>,
    /// Model id. Default when unset: `gpt-4.1-nano`.
    pub model: Option<String>,
    /// Output token cap per page. Default: 4096.
    pub max_tokens: usize,
}

impl Default for VisionLlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            max_tokens: 4096,
        }
    }
}

/// An inclusive range of Unicode scalar values counted as "language signal".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRange(pub u32, pub u32);

impl ScriptRange {
    pub fn contains(&self, c: char) -> bool {
        (self.0..=self.1).contains(&(c as u32))
    }
}

/// Extracted-text validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Minimum character count for text to count as valid. Default: 5.
    pub min_chars: usize,

    /// Script ranges for the language signal. Default: Hiragana, Katakana, CJK Unified Ideographs.
    pub script_ranges: Vec<ScriptRange>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_chars: 5,
            script_ranges: vec![
                ScriptRange(0x3040, 0x309F),
                ScriptRange(0x30A0, 0x30FF),
                ScriptRange(0x4E00, 0x9FAF),
            ],
        }
    }
}

/// Outbound notification settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Endpoint receiving JSON notifications. Required.
    pub webhook_url: Option<String>,
    /// Optional bearer token.
    pub auth_token: Option<String>,
    /// Subject line for success notices; `{filename}` is substituted.
    pub subject_template: String,
    /// Default: 3.
    pub max_attempts: u32,
    /// Base backoff between attempts, doubled each time. Default: 1000.
    pub retry_delay_ms: u64,
    /// Default: 30.
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            auth_token: None,
            subject_template: "Document received - {filename}".to_string(),
            max_attempts: 3,
            retry_delay_ms: 1000,
            timeout_secs: 30,
        }
    }
}

impl fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationConfig")
            .field("webhook_url", &self.webhook_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("subject_template", &self.subject_template)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl NotificationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset. Default: `info`.
    pub level: String,
    /// When set, logs are also written to a daily-rolled file in this directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before attempt `attempt` (0-based): zero for the first, then
    /// `base`, `2·base`, `4·base` …
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

impl Config {
    /// Read, parse and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse without validating.
    pub fn from_file(path: &Path) -> Result<Self, IngestError> {
        let content = std::fs::read_to_string(path).map_err(|e| IngestError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            IngestError::ConfigParse { detail, .. } => IngestError::ConfigParse {
                path: path.to_path_buf(),
                detail,
            },
            other => other,
        })
    }

    /// Parse without validating; callers apply overrides and then call [`Config::validate`].
    pub fn from_toml_str(content: &str) -> Result<Self, IngestError> {
        toml::from_str(content).map_err(|e| IngestError::ConfigParse {
            path: PathBuf::from("<inline>"),
            detail: e.to_string(),
        })
    }

    /// Create a builder starting from defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check cross-field constraints. Every error here is fatal at startup.
    pub fn validate(&self) -> Result<(), IngestError> {
        let invalid = |msg: String| Err(IngestError::InvalidConfig(msg));

        if self.watch.directory.as_os_str().is_empty() {
            return invalid("watch.directory must be set".into());
        }
        if self.watch.extensions.iter().all(|e| e.trim_start_matches('.').is_empty()) {
            return invalid("watch.extensions must name at least one extension".into());
        }
        if self.processing.max_concurrent_files == 0 {
            return invalid("processing.max_concurrent_files must be ≥ 1".into());
        }
        if self.extraction.max_attempts == 0 {
            return invalid("extraction.max_attempts must be ≥ 1".into());
        }
        if self.notification.max_attempts == 0 {
            return invalid("notification.max_attempts must be ≥ 1".into());
        }
        if !(0.0..=1.0).contains(&self.extraction.confidence_threshold) {
            return invalid(format!(
                "extraction.confidence_threshold must be in [0.0, 1.0], got {}",
                self.extraction.confidence_threshold
            ));
        }
        if self.validation.min_chars == 0 {
            return invalid("validation.min_chars must be ≥ 1".into());
        }
        if let Some(r) = self.validation.script_ranges.iter().find(|r| r.0 > r.1) {
            return invalid(format!(
                "validation.script_ranges entry [{:#X}, {:#X}] is inverted",
                r.0, r.1
            ));
        }
        if self
            .notification
            .webhook_url
            .as_deref()
            .is_none_or(|u| u.trim().is_empty())
        {
            return invalid("notification.webhook_url must be set".into());
        }
        if is_inside(&self.processing.temp_directory, &self.watch.directory) {
            return invalid(format!(
                "processing.temp_directory '{}' must not be inside the watched directory",
                self.processing.temp_directory.display()
            ));
        }

        self.validate_backend()
    }

    /// Check that the selected backend has its endpoints and credentials.
    pub fn validate_backend(&self) -> Result<(), IngestError> {
        let ex = &self.extraction;
        let missing = |hint: &str| {
            Err(IngestError::BackendNotConfigured {
                backend: ex.backend.to_string(),
                hint: hint.to_string(),
            })
        };
        match ex.backend {
            BackendKind::PollingApi => {
                if is_blank(&ex.polling_api.base_url) {
                    return missing(
                        "Set extraction.polling_api.base_url or SCANWATCH_OCR_BASE_URL.",
                    );
                }
                if is_blank(&ex.polling_api.email) {
                    return missing("Set extraction.polling_api.email or SCANWATCH_OCR_EMAIL.");
                }
                if ex.polling_api.max_polls == 0 {
                    return missing("extraction.polling_api.max_polls must be ≥ 1.");
                }
            }
            BackendKind::AzureRead => {
                if is_blank(&ex.azure_read.endpoint) || is_blank(&ex.azure_read.key) {
                    return missing("Set AZURE_VISION_ENDPOINT and AZURE_VISION_KEY.");
                }
                if ex.azure_read.max_polls == 0 {
                    return missing("extraction.azure_read.max_polls must be ≥ 1.");
                }
            }
            BackendKind::GoogleVision => {
                if is_blank(&ex.google_vision.api_key) {
                    return missing("Set GOOGLE_VISION_API_KEY.");
                }
            }
            // Provider credentials are resolved by edgequake-llm from the environment.
            BackendKind::VisionLlm => {}
        }
        Ok(())
    }
}

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().is_none_or(|s| s.trim().is_empty())
}

fn is_inside(candidate: &Path, root: &Path) -> bool {
    match (std::path::absolute(candidate), std::path::absolute(root)) {
        (Ok(c), Ok(r)) => c.starts_with(r),
        _ => false,
    }
}

/// Builder for [`Config`].
#[derive(Debug)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn watch_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.watch.directory = dir.into();
        self
    }

    pub fn extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.watch.extensions = exts.into_iter().map(Into::into).collect();
        self
    }

    pub fn recency_minutes(mut self, minutes: u64) -> Self {
        self.config.watch.recency_minutes = minutes;
        self
    }

    pub fn stability_secs(mut self, secs: u64) -> Self {
        self.config.watch.stability_secs = secs;
        self
    }

    pub fn scan_interval_secs(mut self, secs: u64) -> Self {
        self.config.watch.scan_interval_secs = secs;
        self
    }

    pub fn max_concurrent_files(mut self, n: usize) -> Self {
        self.config.processing.max_concurrent_files = n.max(1);
        self
    }

    pub fn temp_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.processing.temp_directory = dir.into();
        self
    }

    pub fn cleanup_temp_files(mut self, v: bool) -> Self {
        self.config.processing.cleanup_temp_files = v;
        self
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.extraction.backend = kind;
        self
    }

    pub fn polling_api(mut self, base_url: impl Into<String>, email: impl Into<String>) -> Self {
        self.config.extraction.polling_api.base_url = Some(base_url.into());
        self.config.extraction.polling_api.email = Some(email.into());
        self
    }

    pub fn extraction_retries(mut self, max_attempts: u32, retry_delay_ms: u64) -> Self {
        self.config.extraction.max_attempts = max_attempts;
        self.config.extraction.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn confidence_threshold(mut self, t: f32) -> Self {
        self.config.extraction.confidence_threshold = t;
        self
    }

    pub fn min_chars(mut self, n: usize) -> Self {
        self.config.validation.min_chars = n;
        self
    }

    pub fn webhook_url(mut self, url: impl Into<String>) -> Self {
        self.config.notification.webhook_url = Some(url.into());
        self
    }

    pub fn notification_retries(mut self, max_attempts: u32, retry_delay_ms: u64) -> Self {
        self.config.notification.max_attempts = max_attempts;
        self.config.notification.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<Config, IngestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[watch]
directory = "/srv/scans"

[extraction.polling_api]
base_url = "https://ocr.example.com/api"
email = "ops@example.com"

[notification]
webhook_url = "https://hooks.example.com/x"
"#;

    #[test]
    fn minimal_file_gets_defaults() {
        let c = Config::from_toml_str(MINIMAL).unwrap();
        c.validate().unwrap();
        assert_eq!(c.watch.extensions, vec!["tif", "tiff"]);
        assert_eq!(c.watch.recency_minutes, 10);
        assert_eq!(c.watch.stability_secs, 5);
        assert_eq!(c.watch.scan_interval_secs, 600);
        assert_eq!(c.processing.max_concurrent_files, 3);
        assert!(c.processing.cleanup_temp_files);
        assert_eq!(c.extraction.backend, BackendKind::PollingApi);
        assert_eq!(c.extraction.max_attempts, 3);
        assert_eq!(c.extraction.polling_api.max_polls, 30);
        assert_eq!(c.validation.min_chars, 5);
        assert_eq!(c.validation.script_ranges.len(), 3);
    }

    #[test]
    fn backend_and_hex_ranges_parse() {
        let toml = r#"
[watch]
directory = "/srv/scans"
[extraction]
backend = "azure_read"
[extraction.azure_read]
endpoint = "https://r.cognitiveservices.azure.com"
key = "k"
[validation]
script_ranges = [[0x0400, 0x04FF]]
[notification]
webhook_url = "https://hooks.example.com/x"
"#;
        let c = Config::from_toml_str(toml).unwrap();
        c.validate().unwrap();
        assert_eq!(c.extraction.backend, BackendKind::AzureRead);
        assert_eq!(c.validation.script_ranges, vec![ScriptRange(0x400, 0x4FF)]);
    }

    #[test]
    fn missing_backend_credentials_is_fatal() {
        let toml = r#"
[watch]
directory = "/srv/scans"
[notification]
webhook_url = "https://hooks.example.com/x"
"#;
        let err = Config::from_toml_str(toml).unwrap().validate().unwrap_err();
        assert!(matches!(err, IngestError::BackendNotConfigured { .. }), "got {err:?}");
    }

    #[test]
    fn missing_webhook_is_fatal() {
        let err = Config::builder()
            .watch_directory("/srv/scans")
            .polling_api("https://ocr", "a@b")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("webhook_url"));
    }

    #[test]
    fn temp_directory_inside_watch_dir_rejected() {
        let err = Config::builder()
            .watch_directory("/srv/scans")
            .temp_directory("/srv/scans/tmp")
            .polling_api("https://ocr", "a@b")
            .webhook_url("https://hooks")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("temp_directory"));
    }

    #[test]
    fn confidence_threshold_range_checked() {
        let err = Config::builder()
            .watch_directory("/srv/scans")
            .polling_api("https://ocr", "a@b")
            .webhook_url("https://hooks")
            .confidence_threshold(1.5)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("confidence_threshold"));
    }

    #[test]
    fn retry_policy_doubles() {
        let p = RetryPolicy::new(4, Duration::from_millis(500));
        assert_eq!(p.delay_before(0), Duration::ZERO);
        assert_eq!(p.delay_before(1), Duration::from_millis(500));
        assert_eq!(p.delay_before(2), Duration::from_millis(1000));
        assert_eq!(p.delay_before(3), Duration::from_millis(2000));
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let mut c = NotificationConfig::default();
        c.auth_token = Some("s3cret".into());
        assert!(!format!("{c:?}").contains("s3cret"));
    }
}
