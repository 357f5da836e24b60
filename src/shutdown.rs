//! Process-level shutdown signal.
//!
//! A running flag checked between scan cycles, plus a wake-up for the
//! inter-cycle sleep. In-flight batches are never interrupted: files already
//! handed to workers finish their pipeline before the loop observes the flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info};

#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
    wake: Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_running(&self) -> bool {
        !self.requested.load(Ordering::SeqCst)
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!("Shutdown requested");
        }
        // `notify_one` stores a permit when nobody is waiting yet, so a
        // sleep that starts after this call still returns immediately.
        self.wake.notify_one();
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` when the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wake.notified() => false,
        }
    }

    /// Trigger on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
    pub fn listen_for_signals(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Received shutdown signal, finishing current cycle");
            this.trigger();
        });
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn sleep_runs_to_completion_when_not_triggered() {
        let s = Shutdown::new();
        assert!(s.sleep(Duration::from_millis(5)).await);
        assert!(s.is_running());
    }

    #[tokio::test]
    async fn trigger_interrupts_a_long_sleep() {
        let s = Shutdown::new();
        let t = Arc::clone(&s);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            t.trigger();
        });
        let start = Instant::now();
        assert!(!s.sleep(Duration::from_secs(60)).await);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!s.is_running());
    }

    #[tokio::test]
    async fn sleep_after_trigger_returns_immediately() {
        let s = Shutdown::new();
        s.trigger();
        s.trigger();
        assert!(!s.sleep(Duration::from_secs(60)).await);
    }
}
