//! Error types for the edgequake-scanwatch library.
//!
//! The split mirrors how failures travel through the system:
//!
//! * [`IngestError`]: **Fatal**: the watcher cannot start at all (bad
//!   configuration, backend credentials missing, notification endpoint
//!   unreachable). Returned as `Err(IngestError)` from startup paths.
//!
//! * [`ConversionError`] / [`ExtractionError`]: **Per-file, terminal**: one
//!   document failed a stage. These never abort the watch loop; they are
//!   recorded in a [`crate::output::PipelineOutcome`] and the file stays
//!   eligible for rediscovery on the next scan.
//!
//! * [`BackendError`]: **Per-call**: a single request against a recognition
//!   backend failed. The extraction state machine classifies it as retryable
//!   or terminal; it never escapes the extraction stage.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned while loading configuration or starting the watcher.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Configuration file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML or does not match the schema.
    #[error("Failed to parse config file '{path}': {detail}")]
    ConfigParse { path: PathBuf, detail: String },

    /// Validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The selected recognition backend is missing credentials or endpoints.
    #[error("Extraction backend '{backend}' is not configured.\n{hint}")]
    BackendNotConfigured { backend: String, hint: String },

    /// The startup connectivity gate failed.
    #[error("Connectivity check failed for {component}")]
    ConnectivityFailed { component: String },

    /// Logging could not be initialised (log directory not writable etc.).
    #[error("Failed to initialise logging: {0}")]
    LoggingInit(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Terminal failure of the conversion stage for one document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Source image not found: '{path}'")]
    SourceMissing { path: PathBuf },

    #[error("Failed to decode '{path}': {detail}")]
    Decode { path: PathBuf, detail: String },

    /// The TIFF uses a sample layout we cannot turn into a page image.
    #[error("Unsupported colour type {color} in '{path}'")]
    UnsupportedColor { path: PathBuf, color: String },

    #[error("No pages found in '{path}'")]
    NoPages { path: PathBuf },

    #[error("Failed to encode page {page}: {detail}")]
    Encode { page: usize, detail: String },

    #[error("Failed to write converted document '{path}': {detail}")]
    Write { path: PathBuf, detail: String },

    // ── Structural validity ───────────────────────────────────────────────
    #[error("Converted document is missing: '{path}'")]
    OutputMissing { path: PathBuf },

    #[error("Converted document is empty: '{path}'")]
    EmptyOutput { path: PathBuf },

    #[error("Converted document is not a PDF: '{path}'\nFirst bytes: {magic:?}")]
    BadMagic { path: PathBuf, magic: Vec<u8> },

    /// The conversion task itself died (panic inside `spawn_blocking`).
    #[error("Conversion task failed: {0}")]
    Task(String),
}

/// Terminal outcome of the extraction stage for one document.
///
/// Only the final state propagates here: transient failures are retried
/// inside the stage and surface only as [`ExtractionError::RetriesExhausted`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// The backend reported the job unknown or already consumed.
    #[error("{backend}: job not found on server or already processed")]
    JobNotFound { backend: String },

    /// The poll budget ran out while the job was still working.
    #[error("{backend}: timed out waiting for result after {attempts} polls")]
    TimedOut { backend: String, attempts: u32 },

    /// A non-retryable failure (bad poll status, malformed response, unreadable document).
    #[error("{backend}: {detail}")]
    Terminal { backend: String, detail: String },

    /// Every outer attempt failed with a retryable error.
    #[error("{backend}: all {attempts} attempts failed. Last error: {last_error}")]
    RetriesExhausted {
        backend: String,
        attempts: u32,
        last_error: String,
    },

    /// The job succeeded but returned no text.
    #[error("{backend}: recognition returned no text")]
    EmptyResult { backend: String },
}

/// A single failed request against a recognition backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection, TLS or timeout failure. Always retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// The server answered but the payload could not be understood.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// The converted document could not be read.
    #[error("cannot read document: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Protocol(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}
