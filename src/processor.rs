//! Pipeline orchestrator.
//!
//! ## Per-file pipeline
//!
//! ```text
//! DISCOVERED ─▶ READY? ─▶ CONVERTED ─▶ CONVERSION_VALID? ─▶ EXTRACTED ─▶ NOTIFIED ─▶ MARKED
//! ```
//!
//! Any `?` checkpoint or stage failure short-circuits to a logged
//! [`PipelineOutcome`] and the file stays out of the dedup cache, so the next
//! scan picks it up again. A file is marked processed only after the
//! notification was delivered. An invalid text verdict travels with the
//! notification as a warning and does not block marking.
//!
//! ## Batches
//!
//! Each cycle runs its candidates through `buffer_unordered` with at most
//! `max_concurrent_files` in flight. Every file runs inside its own
//! `tokio::spawn` so a panic stays with that file: it becomes a
//! [`Stage::Unexpected`] outcome plus an error notification, and the rest of
//! the batch carries on.

use crate::config::Config;
use crate::error::IngestError;
use crate::output::{CandidateFile, ConvertedDocument, CycleReport, PipelineOutcome, Stage};
use crate::pipeline::convert::{
    cleanup_document, validate_document, DocumentConverter, TiffPdfConverter,
};
use crate::pipeline::extract::{build_backend, Extractor};
use crate::pipeline::notify::{Notifier, WebhookNotifier};
use crate::pipeline::validate::validate_text;
use crate::shutdown::Shutdown;
use crate::watch::cache::ProcessedCache;
use crate::watch::discovery::Discovery;
use crate::watch::readiness::wait_until_stable;
use futures::stream::{self, StreamExt};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// The swappable collaborators a [`Processor`] drives.
pub struct Collaborators {
    pub converter: Arc<dyn DocumentConverter>,
    pub extractor: Arc<Extractor>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Production wiring: TIFF→PDF converter, configured backend, webhook.
    pub fn from_config(config: &Config) -> Result<Self, IngestError> {
        let backend = build_backend(config)?;
        Ok(Self {
            converter: Arc::new(TiffPdfConverter::new(&config.processing.temp_directory)?),
            extractor: Arc::new(Extractor::from_config(backend, &config.extraction)),
            notifier: Arc::new(WebhookNotifier::new(&config.notification)?),
        })
    }
}

pub struct Processor {
    config: Config,
    discovery: Discovery,
    converter: Arc<dyn DocumentConverter>,
    extractor: Arc<Extractor>,
    notifier: Arc<dyn Notifier>,
    shutdown: Arc<Shutdown>,
}

impl Processor {
    pub fn new(config: Config, collaborators: Collaborators, shutdown: Arc<Shutdown>) -> Arc<Self> {
        let discovery = Discovery::new(&config.watch, Arc::new(ProcessedCache::new()));
        Arc::new(Self {
            config,
            discovery,
            converter: collaborators.converter,
            extractor: collaborators.extractor,
            notifier: collaborators.notifier,
            shutdown,
        })
    }

    pub fn from_config(config: Config, shutdown: Arc<Shutdown>) -> Result<Arc<Self>, IngestError> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::new(config, collaborators, shutdown))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn cache(&self) -> &Arc<ProcessedCache> {
        self.discovery.cache()
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Fail-fast gate: the loop must not start without a reachable notifier.
    pub async fn check_connectivity(&self) -> Result<(), IngestError> {
        if self.notifier.test_connectivity().await {
            Ok(())
        } else {
            Err(IngestError::ConnectivityFailed {
                component: "notification endpoint".to_string(),
            })
        }
    }

    // ── Per-file pipeline ────────────────────────────────────────────────

    /// Run one file through every stage. Never fails; the outcome says how far it got.
    pub async fn process_file(&self, path: &Path) -> PipelineOutcome {
        let start = Instant::now();
        let elapsed = || start.elapsed().as_millis() as u64;
        info!(file = %path.display(), "Processing file");

        if !wait_until_stable(path, self.config.watch.stability_window()).await {
            warn!(file = %path.display(), "File not ready, skipping");
            return PipelineOutcome::failed(
                path.to_path_buf(),
                Stage::Readiness,
                "file is still being written or could not be read",
                elapsed(),
            );
        }

        let document = match self.converter.convert(path).await {
            Ok(d) => d,
            Err(e) => {
                error!(file = %path.display(), "Failed to convert to PDF: {}", e);
                return PipelineOutcome::failed(
                    path.to_path_buf(),
                    Stage::Conversion,
                    e.to_string(),
                    elapsed(),
                );
            }
        };

        let outcome = self.process_document(path, &document, start).await;

        if self.config.processing.cleanup_temp_files {
            cleanup_document(&document).await;
        }
        outcome
    }

    /// Stages after conversion. Split out so cleanup runs on every exit path.
    async fn process_document(
        &self,
        path: &Path,
        document: &ConvertedDocument,
        start: Instant,
    ) -> PipelineOutcome {
        let elapsed = || start.elapsed().as_millis() as u64;
        let fail = |stage: Stage, msg: String| {
            PipelineOutcome::failed(path.to_path_buf(), stage, msg, elapsed())
        };

        if let Err(e) = validate_document(&document.path).await {
            error!(file = %path.display(), "PDF validation failed: {}", e);
            return fail(Stage::ConversionValidation, e.to_string());
        }

        let text = match self.extractor.extract(&document.path).await {
            Ok(t) => t,
            Err(e) => {
                error!(file = %path.display(), "Failed to extract text: {}", e);
                return fail(Stage::Extraction, e.to_string());
            }
        };

        let report = validate_text(&text, &self.config.validation);
        if !report.is_valid {
            warn!(
                file = %path.display(),
                "Text validation failed: {}",
                report.reason.as_deref().unwrap_or("unknown")
            );
        }

        if !self.notifier.notify_success(path, &text, &report).await {
            error!(file = %path.display(), "Failed to send notification");
            let mut outcome = fail(Stage::Notification, "notification delivery failed".to_string());
            outcome.validation = Some(report);
            return outcome;
        }

        self.discovery.mark_processed(path);
        info!(file = %path.display(), "Successfully processed file");
        PipelineOutcome::succeeded(path.to_path_buf(), report, elapsed())
    }

    // ── Batches and cycles ───────────────────────────────────────────────

    /// Process `candidates` with at most `max_concurrent_files` in flight.
    ///
    /// Outcomes arrive in completion order; each carries its own path.
    pub async fn run_batch(
        self: &Arc<Self>,
        candidates: Vec<CandidateFile>,
    ) -> Vec<PipelineOutcome> {
        let limit = self.config.processing.max_concurrent_files.max(1);
        stream::iter(candidates.into_iter().map(|candidate| {
            let this = Arc::clone(self);
            async move { this.spawn_file(candidate.path).await }
        }))
        .buffer_unordered(limit)
        .collect()
        .await
    }

    async fn spawn_file(self: Arc<Self>, path: PathBuf) -> PipelineOutcome {
        let start = Instant::now();
        let worker = {
            let this = Arc::clone(&self);
            let path = path.clone();
            tokio::spawn(async move { this.process_file(&path).await })
        };

        match worker.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let detail = join_error_detail(e);
                error!(file = %path.display(), "Unexpected error processing file: {}", detail);
                self.notifier
                    .notify_failure(&format!("Processing error: {detail}"), Some(&path))
                    .await;
                let elapsed = start.elapsed().as_millis() as u64;
                PipelineOutcome::failed(path, Stage::Unexpected, detail, elapsed)
            }
        }
    }

    /// One scan: discover, process the batch, reconcile the cache.
    pub async fn run_cycle(self: &Arc<Self>) -> CycleReport {
        let start = Instant::now();
        let candidates = self.discovery.scan().await;
        let discovered = candidates.len();

        let outcomes = if candidates.is_empty() {
            debug!("No new files found");
            Vec::new()
        } else {
            info!("Found {} new file(s) to process", discovered);
            self.run_batch(candidates).await
        };

        self.discovery.reconcile().await;

        let elapsed = start.elapsed().as_millis() as u64;
        let report = CycleReport::from_outcomes(discovered, outcomes, elapsed);
        if discovered > 0 {
            info!(
                "Scan cycle complete: {} succeeded, {} failed ({} ms)",
                report.succeeded, report.failed, report.duration_ms
            );
        }
        report
    }

    /// Scan, sleep, repeat until shutdown is requested.
    ///
    /// The flag is only observed between cycles; the sleep is interruptible.
    pub async fn run_continuous(self: Arc<Self>) {
        let interval = self.config.watch.scan_interval();
        info!(
            "Starting continuous monitoring of {} (every {:?})",
            self.discovery.root().display(),
            interval
        );

        while self.shutdown.is_running() {
            let this = Arc::clone(&self);
            if let Err(e) = tokio::spawn(async move { this.run_cycle().await }).await {
                let detail = join_error_detail(e);
                error!("Scan cycle error: {}", detail);
                self.notifier
                    .notify_failure(&format!("Scan cycle error: {detail}"), None)
                    .await;
            }

            if !self.shutdown.is_running() {
                break;
            }
            debug!("Next scan in {:?}", interval);
            self.shutdown.sleep(interval).await;
        }

        info!("Continuous monitoring stopped");
    }
}

fn join_error_detail(e: JoinError) -> String {
    if e.is_panic() {
        panic_message(e.into_panic().as_ref())
    } else {
        e.to_string()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(s.as_ref()), "owned boom");
        let s: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(s.as_ref()), "task panicked");
    }

    #[tokio::test]
    async fn join_error_from_panicking_task() {
        let err = tokio::spawn(async { panic!("converter exploded") }).await.unwrap_err();
        assert_eq!(join_error_detail(err), "converter exploded");
    }
}
