//! Readiness gate: is a discovered file still being written?
//!
//! Scanners and fax gateways write files in several chunks. Sampling size and
//! mtime twice, one stability window apart, is a cheap debounce that catches
//! the common case without needing platform-specific file locks. The wait is a
//! sleep local to the worker that owns the file; other workers keep running.

use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    size: u64,
    modified: Option<SystemTime>,
}

async fn snapshot(path: &Path) -> std::io::Result<Snapshot> {
    let meta = tokio::fs::metadata(path).await?;
    Ok(Snapshot {
        size: meta.len(),
        modified: meta.modified().ok(),
    })
}

/// Returns `true` only if size and modification time are identical at the
/// start and end of `window`.
///
/// Any I/O error (file vanished, permission denied) counts as "not ready" and
/// is logged, never returned.
pub async fn wait_until_stable(path: &Path, window: Duration) -> bool {
    let before = match snapshot(path).await {
        Ok(s) => s,
        Err(e) => {
            warn!(file = %path.display(), "Error checking file stability: {}", e);
            return false;
        }
    };

    tokio::time::sleep(window).await;

    let after = match snapshot(path).await {
        Ok(s) => s,
        Err(e) => {
            warn!(file = %path.display(), "Error checking file stability: {}", e);
            return false;
        }
    };

    if before == after {
        true
    } else {
        debug!(file = %path.display(), "File still being written");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn unchanged_file_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tif");
        std::fs::write(&path, b"II*\0data").unwrap();

        assert!(wait_until_stable(&path, Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn file_mutated_mid_window_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tif");
        std::fs::write(&path, b"II*\0partial").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&writer_path)
                .unwrap();
            f.write_all(b"more bytes").unwrap();
        });

        let ready = wait_until_stable(&path, Duration::from_millis(300)).await;
        writer.await.unwrap();
        assert!(!ready);
    }

    #[tokio::test]
    async fn missing_file_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!wait_until_stable(&dir.path().join("nope.tif"), Duration::ZERO).await);
    }
}
