//! Deduplication cache of successfully processed files.
//!
//! In-memory and best-effort: a restart forgets everything, which is why
//! discovery also applies a recency window. Entries are never aged out on a
//! timer; [`ProcessedCache::reconcile`] drops exactly the entries whose files
//! are gone from disk.
//!
//! Workers mark files concurrently while the cycle loop reconciles, so both
//! mutations go through one mutex.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct ProcessedCache {
    entries: Mutex<HashSet<PathBuf>>,
}

impl ProcessedCache {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking holder cannot leave the set half-updated, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `path` as processed. Idempotent.
    pub fn mark(&self, path: &Path) {
        self.lock().insert(path.to_path_buf());
    }

    pub fn should_skip(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    /// Keep only entries present in `live`. Returns how many were dropped.
    ///
    /// Never adds: the result is always a subset of the previous contents.
    pub fn reconcile(&self, live: &HashSet<PathBuf>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|p| live.contains(p));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn set(paths: &[&str]) -> HashSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn mark_is_idempotent() {
        let cache = ProcessedCache::new();
        cache.mark(Path::new("/in/a.tif"));
        cache.mark(Path::new("/in/a.tif"));
        assert_eq!(cache.len(), 1);
        assert!(cache.should_skip(Path::new("/in/a.tif")));
        assert!(!cache.should_skip(Path::new("/in/b.tif")));
    }

    #[test]
    fn reconcile_drops_missing_and_never_adds() {
        let cache = ProcessedCache::new();
        cache.mark(Path::new("/in/a.tif"));
        cache.mark(Path::new("/in/b.tif"));

        let removed = cache.reconcile(&set(&["/in/a.tif", "/in/c.tif", "/in/d.tif"]));

        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.should_skip(Path::new("/in/a.tif")));
        assert!(!cache.should_skip(Path::new("/in/c.tif")));
    }

    #[test]
    fn reconcile_with_empty_live_set_clears() {
        let cache = ProcessedCache::new();
        cache.mark(Path::new("/in/a.tif"));
        assert_eq!(cache.reconcile(&HashSet::new()), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_marks_and_reconciles() {
        let cache = Arc::new(ProcessedCache::new());
        let live: HashSet<PathBuf> = (0..100)
            .map(|i| PathBuf::from(format!("/in/{i}.tif")))
            .collect();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                let live = live.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.mark(Path::new(&format!("/in/{i}.tif")));
                        if i % 10 == t {
                            cache.reconcile(&live);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 100);
    }
}
