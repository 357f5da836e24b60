//! Text extraction: one state machine, interchangeable recognition backends.
//!
//! ## State machine
//!
//! ```text
//!              submit ok (token)            poll: working (budget left)
//! SUBMITTING ─────────────────────▶ POLLING ◀──────────────┐
//!     │  submit ok (text)               │ ─────────────────┘
//!     │                                 ├── ready ──────────▶ SUCCEEDED
//!     ├───────────────────────────────────────────────────▶ SUCCEEDED
//!     │                                 ├── not found ──────▶ FAILED (terminal)
//!     └── error ──▶ FAILED              └── budget spent ───▶ TIMED_OUT
//! ```
//!
//! Backends only implement the two calls ([`RecognitionBackend::submit`] and
//! [`RecognitionBackend::poll`]) and classify what the server said. The
//! [`Extractor`] drives the transitions, sleeps between polls and wraps each
//! full run in an outer retry loop.
//!
//! ## Why restart from SUBMITTING?
//!
//! Job tokens are not assumed to survive a failure: after a dropped
//! connection we cannot tell whether the server still holds the job, already
//! handed the result to someone else, or never saw the upload. A fresh
//! submission is always safe; resuming a stale token is not.
//!
//! Direct backends (Google Vision, vision LLMs) answer at submission time
//! with [`Submission::Complete`] and never enter POLLING.

pub mod azure_read;
pub mod google_vision;
pub mod pages;
pub mod polling_api;
pub mod vision_llm;

use crate::config::{BackendKind, Config, ExtractionConfig, RetryPolicy};
use crate::error::{BackendError, ExtractionError, IngestError};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

// ── Backend contract ─────────────────────────────────────────────────────────

/// Opaque handle for a job accepted by a polling backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobToken(String);

impl JobToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Text returned by a backend, with its confidence when the backend reports one.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: Option<f32>,
}

impl Recognition {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
        }
    }
}

/// What the backend answered to an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Accepted; poll with this token.
    Pending(JobToken),
    /// Synchronous backend: the result is already here.
    Complete(Recognition),
}

/// Classified answer to a status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Working,
    /// Job expired or its result was already claimed.
    NotFound,
    Ready(Recognition),
}

/// Poll budget for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub max_polls: u32,
    pub interval: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            max_polls: 30,
            interval: Duration::from_secs(10),
        }
    }
}

/// One recognition service.
///
/// Implementations perform single requests and classify responses. They
/// never sleep or retry; that is the [`Extractor`]'s job.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str;

    async fn submit(&self, document: &Path) -> Result<Submission, BackendError>;

    /// Only called after [`Submission::Pending`]. Direct backends keep the default.
    async fn poll(&self, token: &JobToken) -> Result<PollStatus, BackendError> {
        Err(BackendError::Protocol(format!(
            "{} does not issue job tokens (got '{}')",
            self.name(),
            token
        )))
    }

    fn schedule(&self) -> PollSchedule {
        PollSchedule::default()
    }
}

// ── State machine ────────────────────────────────────────────────────────────

#[derive(Debug)]
enum JobState {
    Submitting,
    Polling { token: JobToken, polls: u32 },
    Done(JobOutcome),
}

/// Terminal state of one submit/poll run.
#[derive(Debug)]
enum JobOutcome {
    Succeeded(Recognition),
    Failed(JobFailure),
    TimedOut { polls: u32 },
}

#[derive(Debug)]
enum JobFailure {
    /// Transport trouble; worth a fresh submission.
    Retryable(String),
    NotFound,
    Terminal(String),
}

/// A rejected upload or a dropped connection may succeed on a fresh attempt.
fn classify_submit_error(e: BackendError) -> JobFailure {
    match e {
        BackendError::Transport(_) | BackendError::Status { .. } => {
            JobFailure::Retryable(e.to_string())
        }
        BackendError::Protocol(_) | BackendError::Io(_) => JobFailure::Terminal(e.to_string()),
    }
}

/// Only transport errors restart the job; an error status on a poll is final.
fn classify_poll_error(e: BackendError) -> JobFailure {
    match e {
        BackendError::Transport(_) => JobFailure::Retryable(e.to_string()),
        _ => JobFailure::Terminal(e.to_string()),
    }
}

/// Drives a [`RecognitionBackend`] through the state machine with outer retry.
pub struct Extractor {
    backend: Arc<dyn RecognitionBackend>,
    retry: RetryPolicy,
    confidence_threshold: f32,
}

impl Extractor {
    pub fn new(
        backend: Arc<dyn RecognitionBackend>,
        retry: RetryPolicy,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            backend,
            retry,
            confidence_threshold,
        }
    }

    pub fn from_config(backend: Arc<dyn RecognitionBackend>, config: &ExtractionConfig) -> Self {
        Self::new(backend, config.retry_policy(), config.confidence_threshold)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Extract text from a converted document.
    ///
    /// Transient failures are retried here and never escape; the error
    /// returned is always the final state.
    pub async fn extract(&self, document: &Path) -> Result<String, ExtractionError> {
        let backend = self.backend.name().to_string();
        let max = self.retry.max_attempts;
        let mut last_error = String::new();

        for attempt in 0..max {
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                warn!("{}: retry {}/{} after {:?}", backend, attempt, max - 1, delay);
                sleep(delay).await;
            }
            info!(
                file = %document.display(),
                "Extracting text via {} (attempt {}/{})",
                backend,
                attempt + 1,
                max
            );

            match self.run_job(document).await {
                JobOutcome::Succeeded(recognition) => return self.accept(&backend, recognition),
                JobOutcome::TimedOut { polls } => {
                    error!("{}: timed out waiting for result after {} polls", backend, polls);
                    return Err(ExtractionError::TimedOut {
                        backend,
                        attempts: polls,
                    });
                }
                JobOutcome::Failed(JobFailure::NotFound) => {
                    error!("{}: file not found on server or already processed", backend);
                    return Err(ExtractionError::JobNotFound { backend });
                }
                JobOutcome::Failed(JobFailure::Terminal(detail)) => {
                    error!("{}: {}", backend, detail);
                    return Err(ExtractionError::Terminal { backend, detail });
                }
                JobOutcome::Failed(JobFailure::Retryable(detail)) => {
                    warn!("{}: attempt {} failed: {}", backend, attempt + 1, detail);
                    last_error = detail;
                }
            }
        }

        error!(file = %document.display(), "All extraction attempts failed");
        Err(ExtractionError::RetriesExhausted {
            backend,
            attempts: max,
            last_error,
        })
    }

    /// One full run from SUBMITTING to a terminal state.
    async fn run_job(&self, document: &Path) -> JobOutcome {
        let schedule = self.backend.schedule();
        let mut state = JobState::Submitting;

        loop {
            state = match state {
                JobState::Submitting => match self.backend.submit(document).await {
                    Ok(Submission::Complete(recognition)) => {
                        JobState::Done(JobOutcome::Succeeded(recognition))
                    }
                    Ok(Submission::Pending(token)) => {
                        info!("Upload accepted, job token: {}", token);
                        JobState::Polling { token, polls: 0 }
                    }
                    Err(e) => JobState::Done(JobOutcome::Failed(classify_submit_error(e))),
                },

                JobState::Polling { polls, .. } if polls >= schedule.max_polls => {
                    JobState::Done(JobOutcome::TimedOut { polls })
                }

                JobState::Polling { token, polls } => {
                    if polls > 0 {
                        sleep(schedule.interval).await;
                    }
                    debug!("Polling job {} (poll {}/{})", token, polls + 1, schedule.max_polls);
                    match self.backend.poll(&token).await {
                        Ok(PollStatus::Working) => {
                            debug!("Job {} still processing", token);
                            JobState::Polling {
                                token,
                                polls: polls + 1,
                            }
                        }
                        Ok(PollStatus::NotFound) => {
                            JobState::Done(JobOutcome::Failed(JobFailure::NotFound))
                        }
                        Ok(PollStatus::Ready(recognition)) => {
                            JobState::Done(JobOutcome::Succeeded(recognition))
                        }
                        Err(e) => JobState::Done(JobOutcome::Failed(classify_poll_error(e))),
                    }
                }

                JobState::Done(outcome) => return outcome,
            };
        }
    }

    /// Confidence is advisory: a low score is logged, never suppresses text.
    fn accept(&self, backend: &str, recognition: Recognition) -> Result<String, ExtractionError> {
        if recognition.text.is_empty() {
            warn!("{}: recognition returned no text", backend);
            return Err(ExtractionError::EmptyResult {
                backend: backend.to_string(),
            });
        }
        match recognition.confidence {
            Some(c) if c < self.confidence_threshold => warn!(
                "{}: OCR confidence {:.2} below threshold {:.2}",
                backend, c, self.confidence_threshold
            ),
            Some(c) => info!("{}: extraction completed, confidence {:.2}", backend, c),
            None => info!("{}: extraction completed", backend),
        }
        Ok(recognition.text)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Build the backend selected by `config.extraction.backend`.
pub fn build_backend(config: &Config) -> Result<Arc<dyn RecognitionBackend>, IngestError> {
    let ex = &config.extraction;
    let client = reqwest::Client::builder()
        .timeout(ex.request_timeout())
        .build()
        .map_err(|e| IngestError::Internal(format!("HTTP client: {e}")))?;

    let not_configured = |hint: &str| IngestError::BackendNotConfigured {
        backend: ex.backend.to_string(),
        hint: hint.to_string(),
    };

    let backend: Arc<dyn RecognitionBackend> = match ex.backend {
        BackendKind::PollingApi => {
            let cfg = &ex.polling_api;
            match (cfg.base_url.as_deref(), cfg.email.as_deref()) {
                (Some(base_url), Some(email)) => Arc::new(polling_api::PollingApiBackend::new(
                    client,
                    base_url,
                    email,
                    PollSchedule {
                        max_polls: cfg.max_polls,
                        interval: Duration::from_secs(cfg.poll_interval_secs),
                    },
                )),
                _ => return Err(not_configured("Set extraction.polling_api.base_url and email.")),
            }
        }
        BackendKind::AzureRead => {
            let cfg = &ex.azure_read;
            match (cfg.endpoint.as_deref(), cfg.key.as_deref()) {
                (Some(endpoint), Some(key)) => Arc::new(azure_read::AzureReadBackend::new(
                    client,
                    endpoint,
                    key,
                    PollSchedule {
                        max_polls: cfg.max_polls,
                        interval: Duration::from_millis(cfg.poll_interval_ms),
                    },
                )),
                _ => return Err(not_configured("Set AZURE_VISION_ENDPOINT and AZURE_VISION_KEY.")),
            }
        }
        BackendKind::GoogleVision => {
            let cfg = &ex.google_vision;
            match cfg.api_key.as_deref() {
                Some(key) => Arc::new(google_vision::GoogleVisionBackend::new(
                    client,
                    &cfg.endpoint,
                    key,
                )),
                None => return Err(not_configured("Set GOOGLE_VISION_API_KEY.")),
            }
        }
        BackendKind::VisionLlm => {
            Arc::new(vision_llm::VisionLlmBackend::from_config(&ex.vision_llm)?)
        }
    };

    info!("{} OCR client initialized", backend.name());
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend replaying scripted answers and recording every call.
    struct Scripted {
        submits: Mutex<VecDeque<Result<Submission, BackendError>>>,
        polls: Mutex<VecDeque<Result<PollStatus, BackendError>>>,
        polled_tokens: Mutex<Vec<String>>,
        submit_calls: Mutex<u32>,
        max_polls: u32,
    }

    impl Scripted {
        fn new(
            submits: Vec<Result<Submission, BackendError>>,
            polls: Vec<Result<PollStatus, BackendError>>,
            max_polls: u32,
        ) -> Arc<Self> {
            Arc::new(Self {
                submits: Mutex::new(submits.into()),
                polls: Mutex::new(polls.into()),
                polled_tokens: Mutex::new(Vec::new()),
                submit_calls: Mutex::new(0),
                max_polls,
            })
        }

        fn polled(&self) -> Vec<String> {
            self.polled_tokens.lock().unwrap().clone()
        }

        fn submits(&self) -> u32 {
            *self.submit_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl RecognitionBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn submit(&self, _document: &Path) -> Result<Submission, BackendError> {
            *self.submit_calls.lock().unwrap() += 1;
            self.submits
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Protocol("script exhausted".into())))
        }

        async fn poll(&self, token: &JobToken) -> Result<PollStatus, BackendError> {
            self.polled_tokens.lock().unwrap().push(token.to_string());
            self.polls.lock().unwrap().pop_front().unwrap_or(Ok(PollStatus::Working))
        }

        fn schedule(&self) -> PollSchedule {
            PollSchedule {
                max_polls: self.max_polls,
                interval: Duration::from_millis(1),
            }
        }
    }

    fn extractor(backend: Arc<Scripted>, attempts: u32) -> Extractor {
        Extractor::new(backend, RetryPolicy::new(attempts, Duration::from_millis(1)), 0.7)
    }

    fn pending(t: &str) -> Result<Submission, BackendError> {
        Ok(Submission::Pending(JobToken::new(t)))
    }

    fn ready(t: &str) -> Result<PollStatus, BackendError> {
        Ok(PollStatus::Ready(Recognition::text(t)))
    }

    #[tokio::test]
    async fn ready_after_working_polls() {
        let b = Scripted::new(
            vec![pending("t1")],
            vec![Ok(PollStatus::Working), Ok(PollStatus::Working), ready("Hello world")],
            30,
        );
        let text = extractor(b.clone(), 3).extract(Path::new("x.pdf")).await.unwrap();
        assert_eq!(text, "Hello world");
        assert_eq!(b.polled(), vec!["t1", "t1", "t1"]);
        assert_eq!(b.submits(), 1);
    }

    #[tokio::test]
    async fn submit_transport_failure_resubmits_with_fresh_token() {
        let b = Scripted::new(
            vec![Err(BackendError::Transport("connection reset".into())), pending("t2")],
            vec![ready("text")],
            5,
        );
        let text = extractor(b.clone(), 3).extract(Path::new("x.pdf")).await.unwrap();
        assert_eq!(text, "text");
        assert_eq!(b.submits(), 2);
        assert_eq!(b.polled(), vec!["t2"]);
    }

    #[tokio::test]
    async fn poll_transport_failure_restarts_from_submit() {
        let b = Scripted::new(
            vec![pending("t1"), pending("t2")],
            vec![
                Ok(PollStatus::Working),
                Err(BackendError::Transport("timeout".into())),
                ready("done"),
            ],
            5,
        );
        let text = extractor(b.clone(), 3).extract(Path::new("x.pdf")).await.unwrap();
        assert_eq!(text, "done");
        // The stale token t1 is never polled after the failure.
        assert_eq!(b.polled(), vec!["t1", "t1", "t2"]);
    }

    #[tokio::test]
    async fn submit_rejection_is_retried_until_exhausted() {
        let b = Scripted::new(
            vec![
                Err(BackendError::Status { code: 503, body: "busy".into() }),
                Err(BackendError::Status { code: 503, body: "busy".into() }),
                Err(BackendError::Status { code: 503, body: "busy".into() }),
            ],
            vec![],
            5,
        );
        let err = extractor(b.clone(), 3).extract(Path::new("x.pdf")).await.unwrap_err();
        match err {
            ExtractionError::RetriesExhausted { attempts, last_error, .. } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(b.submits(), 3);
    }

    #[tokio::test]
    async fn not_found_is_terminal_and_not_retried() {
        let b = Scripted::new(
            vec![pending("t1"), pending("t2")],
            vec![Ok(PollStatus::NotFound)],
            5,
        );
        let err = extractor(b.clone(), 3).extract(Path::new("x.pdf")).await.unwrap_err();
        assert!(matches!(err, ExtractionError::JobNotFound { .. }));
        assert_eq!(b.submits(), 1);
    }

    #[tokio::test]
    async fn always_working_times_out_after_exactly_max_polls() {
        let b = Scripted::new(vec![pending("t1"), pending("t2")], vec![], 4);
        let err = extractor(b.clone(), 3).extract(Path::new("x.pdf")).await.unwrap_err();
        assert_eq!(
            err,
            ExtractionError::TimedOut {
                backend: "scripted".into(),
                attempts: 4
            }
        );
        assert_eq!(b.polled().len(), 4);
        assert_eq!(b.submits(), 1);
    }

    #[tokio::test]
    async fn poll_error_status_is_terminal() {
        let b = Scripted::new(
            vec![pending("t1"), pending("t2")],
            vec![Err(BackendError::Status { code: 500, body: "boom".into() })],
            5,
        );
        let err = extractor(b.clone(), 3).extract(Path::new("x.pdf")).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Terminal { .. }), "got {err:?}");
        assert_eq!(b.submits(), 1);
    }

    #[tokio::test]
    async fn direct_backend_skips_polling() {
        let b = Scripted::new(
            vec![Ok(Submission::Complete(Recognition {
                text: "直接".into(),
                confidence: Some(0.2),
            }))],
            vec![],
            5,
        );
        // Below-threshold confidence still returns the text.
        let text = extractor(b.clone(), 1).extract(Path::new("x.pdf")).await.unwrap();
        assert_eq!(text, "直接");
        assert!(b.polled().is_empty());
    }

    #[tokio::test]
    async fn empty_text_is_a_failure() {
        let b = Scripted::new(vec![pending("t1")], vec![ready("")], 5);
        let err = extractor(b, 3).extract(Path::new("x.pdf")).await.unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyResult { .. }));
    }

    #[tokio::test]
    async fn default_poll_rejects_tokens() {
        struct Direct;
        #[async_trait]
        impl RecognitionBackend for Direct {
            fn name(&self) -> &str {
                "direct"
            }
            async fn submit(&self, _d: &Path) -> Result<Submission, BackendError> {
                Ok(Submission::Pending(JobToken::new("oops")))
            }
        }
        let err = Direct.poll(&JobToken::new("oops")).await.unwrap_err();
        assert!(matches!(err, BackendError::Protocol(_)));
    }
}
