//! # edgequake-scanwatch
//!
//! Watch a directory for scanned documents (fax gateways, office scanners),
//! convert each TIFF to PDF, extract its text through an OCR backend and send
//! a notification with the result.
//!
//! ## Why this crate?
//!
//! Scan-to-folder is still how many offices receive paper. The hard part is
//! not the OCR call but running unattended: files arrive half-written, the
//! OCR service answers "still working" for minutes or drops connections, and
//! the notification endpoint goes down. Every document must still be picked
//! up and reported once, and no single bad file may stall the others.
//!
//! ## Pipeline Overview
//!
//! ```text
//! watched dir
//!  │
//!  ├─ 1. Discover  recent *.tif/*.tiff not in the dedup cache
//!  ├─ 2. Ready?    size + mtime stable across the stability window
//!  ├─ 3. Convert   every TIFF frame → one PDF page (spawn_blocking)
//!  ├─ 4. Valid?    non-empty, starts with %PDF
//!  ├─ 5. Extract   submit → poll → result, with outer retry/backoff
//!  ├─ 6. Validate  char/word/line counts + script-range language signal
//!  ├─ 7. Notify    webhook with retry
//!  └─ 8. Mark      into the dedup cache (success only)
//! ```
//!
//! Up to `max_concurrent_files` files run through steps 2–8 at once.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_scanwatch::{Config, Processor, Shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(std::path::Path::new("scanwatch.toml"))?;
//!     let processor = Processor::from_config(config, Shutdown::new())?;
//!     processor.check_connectivity().await?;
//!     let report = processor.run_cycle().await;
//!     eprintln!("{} succeeded, {} failed", report.succeeded, report.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scanwatch` binary and its logging setup |
//!
//! ## Choosing a Backend
//!
//! | Backend | Shape | Confidence | Notes |
//! |---------|-------|------------|-------|
//! | `polling_api`   | upload + poll token | no  | Default |
//! | `azure_read`    | operation handle + poll | no | Azure Computer Vision Read v3.2 |
//! | `google_vision` | synchronous | yes | `DOCUMENT_TEXT_DETECTION` per page |
//! | `vision_llm`    | synchronous | no  | Any edgequake-llm vision provider |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod health;
#[cfg(feature = "cli")]
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod processor;
pub mod shutdown;
pub mod watch;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{BackendKind, Config, ConfigBuilder, RetryPolicy};
pub use error::{BackendError, ConversionError, ExtractionError, IngestError};
pub use health::{HealthReport, HealthStatus};
pub use output::{CandidateFile, ConvertedDocument, CycleReport, PipelineOutcome, Stage};
pub use pipeline::convert::{DocumentConverter, TiffPdfConverter};
pub use pipeline::extract::{Extractor, RecognitionBackend};
pub use pipeline::notify::{Notifier, WebhookNotifier};
pub use pipeline::validate::{validate_text, ValidationReport};
pub use processor::{Collaborators, Processor};
pub use shutdown::Shutdown;
pub use watch::cache::ProcessedCache;
