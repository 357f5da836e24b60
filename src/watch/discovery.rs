//! File discovery: walk the watched tree and yield new candidates.
//!
//! ## Why a recency window on top of the cache?
//!
//! The dedup cache lives in memory. After a restart it is empty, and without
//! a second filter every document still sitting in the directory would be
//! converted, OCR'd and notified again. Only files modified within
//! `recency_minutes` are candidates, which bounds that blast radius.
//!
//! Walking is blocking I/O, so the async entry points move it onto the
//! blocking pool the same way rendering used `spawn_blocking`.

use crate::config::WatchConfig;
use crate::output::CandidateFile;
use crate::watch::cache::ProcessedCache;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info};
use walkdir::WalkDir;

/// Scans one directory tree. Owns the dedup cache.
#[derive(Debug, Clone)]
pub struct Discovery {
    root: PathBuf,
    extensions: Arc<Vec<String>>,
    recency: Duration,
    follow_symlinks: bool,
    cache: Arc<ProcessedCache>,
}

impl Discovery {
    pub fn new(config: &WatchConfig, cache: Arc<ProcessedCache>) -> Self {
        let extensions = config
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self {
            root: config.directory.clone(),
            extensions: Arc::new(extensions),
            recency: config.recency_window(),
            follow_symlinks: config.follow_symlinks,
            cache,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache(&self) -> &Arc<ProcessedCache> {
        &self.cache
    }

    pub fn is_target(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.extensions.iter().any(|x| *x == e)
            })
            .unwrap_or(false)
    }

    /// Record a successfully processed file.
    pub fn mark_processed(&self, path: &Path) {
        self.cache.mark(path);
        debug!(file = %path.display(), "Marked file as processed");
    }

    /// Candidates for this cycle, sorted by path.
    ///
    /// Never fails: any directory-read error is logged and yields an empty
    /// batch. A skipped cycle is safe because files reappear next scan.
    pub async fn scan(&self) -> Vec<CandidateFile> {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.scan_blocking()).await {
            Ok(files) => files,
            Err(e) => {
                error!("Scan task failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Blocking implementation of [`Discovery::scan`].
    pub fn scan_blocking(&self) -> Vec<CandidateFile> {
        if !self.root.exists() {
            error!("Watch directory does not exist: {}", self.root.display());
            return Vec::new();
        }

        let threshold = SystemTime::now()
            .checked_sub(self.recency)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut found = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(self.follow_symlinks) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if vanished(&e) => {
                    debug!("Entry disappeared during scan: {}", e);
                    continue;
                }
                Err(e) => {
                    error!("Error scanning directory {}: {}", self.root.display(), e);
                    return Vec::new();
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !self.is_target(path) || self.cache.should_skip(path) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(e) if vanished(&e) => {
                    debug!(file = %path.display(), "File disappeared during scan");
                    continue;
                }
                Err(e) => {
                    error!("Error scanning directory {}: {}", self.root.display(), e);
                    return Vec::new();
                }
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if modified >= threshold {
                info!(file = %path.display(), "New file detected");
                found.push(CandidateFile {
                    path: path.to_path_buf(),
                    modified,
                    size: meta.len(),
                });
            }
        }

        found.sort_by(|a, b| a.path.cmp(&b.path));
        found
    }

    /// Every target file currently on disk, ignoring recency and cache.
    /// `None` if the walk failed.
    fn live_files_blocking(&self) -> Option<HashSet<PathBuf>> {
        let mut live = HashSet::new();
        for entry in WalkDir::new(&self.root).follow_links(self.follow_symlinks) {
            match entry {
                Ok(e) if e.file_type().is_file() && self.is_target(e.path()) => {
                    live.insert(e.into_path());
                }
                Ok(_) => {}
                Err(e) if vanished(&e) => {}
                Err(e) => {
                    error!("Error during cache cleanup: {}", e);
                    return None;
                }
            }
        }
        Some(live)
    }

    /// Prune cache entries whose files no longer exist. A failed walk is a no-op.
    pub async fn reconcile(&self) -> usize {
        let this = self.clone();
        let live = match tokio::task::spawn_blocking(move || this.live_files_blocking()).await {
            Ok(Some(live)) => live,
            Ok(None) => return 0,
            Err(e) => {
                error!("Cache cleanup task failed: {}", e);
                return 0;
            }
        };
        let removed = self.cache.reconcile(&live);
        if removed > 0 {
            info!("Cleaned up {} entries from processed files cache", removed);
        }
        removed
    }
}

/// An entry below the root that was removed between listing and `stat`.
fn vanished(e: &walkdir::Error) -> bool {
    e.depth() > 0
        && e
            .io_error()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
}
