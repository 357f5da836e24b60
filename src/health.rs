//! Health check: per-component status without doing any ingestion work.

use crate::config::Config;
use crate::pipeline::notify::{Notifier, WebhookNotifier};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Overall status plus one `"ok"` / `"error: …"` entry per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Local>,
    pub components: BTreeMap<String, String>,
}

impl HealthReport {
    fn new() -> Self {
        Self {
            status: HealthStatus::Healthy,
            checked_at: Local::now(),
            components: BTreeMap::new(),
        }
    }

    fn record(&mut self, component: &str, result: Result<(), String>) {
        let entry = match result {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                self.status = HealthStatus::Unhealthy;
                format!("error: {e}")
            }
        };
        self.components.insert(component.to_string(), entry);
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn render_text(&self) -> String {
        let status = match self.status {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        };
        let mut out = format!("Health Status: {status}\n");
        for (component, state) in &self.components {
            let _ = writeln!(out, "  {component}: {state}");
        }
        out
    }
}

/// Check every component using the configured webhook notifier.
pub async fn check(config: &Config) -> HealthReport {
    match WebhookNotifier::new(&config.notification) {
        Ok(notifier) => check_with_notifier(config, &notifier).await,
        Err(e) => {
            let mut report = check_local(config).await;
            report.record("notifier", Err(e.to_string()));
            report
        }
    }
}

pub async fn check_with_notifier(config: &Config, notifier: &dyn Notifier) -> HealthReport {
    let mut report = check_local(config).await;
    let reachable = if notifier.test_connectivity().await {
        Ok(())
    } else {
        Err("connection failed".to_string())
    };
    report.record("notifier", reachable);
    report
}

async fn check_local(config: &Config) -> HealthReport {
    let mut report = HealthReport::new();
    report.record("file_monitor", check_watch_dir(&config.watch.directory).await);
    report.record("temp_directory", check_temp_dir(&config.processing.temp_directory).await);
    report.record(
        "extraction",
        config.validate_backend().map_err(|e| e.to_string()),
    );
    report
}

async fn check_watch_dir(dir: &Path) -> Result<(), String> {
    match tokio::fs::read_dir(dir).await {
        Ok(_) => Ok(()),
        Err(e) => Err(format!("directory not accessible ({}): {e}", dir.display())),
    }
}

async fn check_temp_dir(dir: &Path) -> Result<(), String> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| format!("cannot create {}: {e}", dir.display()))
}
