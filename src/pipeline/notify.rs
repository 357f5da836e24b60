//! Outbound notifications.
//!
//! The core only sees the [`Notifier`] trait: three calls that answer `bool`
//! and do their own retrying. [`WebhookNotifier`] is the shipped transport;
//! it POSTs a JSON [`Notification`] to one endpoint with bounded exponential
//! backoff.
//!
//! Message rendering is kept separate from delivery ([`render_success`],
//! [`render_failure`]) so the wording can be tested without a server.

use crate::config::{NotificationConfig, RetryPolicy};
use crate::error::IngestError;
use crate::pipeline::validate::ValidationReport;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

const RULE: &str = "==================================================";
const SUB_RULE: &str = "------------------------------";

/// Delivery contract consumed by the processor.
///
/// `false` means every internal attempt failed; callers never retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_success(&self, source: &Path, text: &str, report: &ValidationReport) -> bool;

    async fn notify_failure(&self, message: &str, source: Option<&Path>) -> bool;

    /// Startup and health-check gate.
    async fn test_connectivity(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Error,
}

/// Wire payload of one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    pub file: Option<String>,
    pub metadata: Option<ValidationReport>,
}

// ── Rendering ────────────────────────────────────────────────────────────────

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

pub fn render_success(
    subject_template: &str,
    source: &Path,
    text: &str,
    report: &ValidationReport,
    now: DateTime<Local>,
) -> Notification {
    let name = file_name(source);
    let body = [
        "Document received".to_string(),
        RULE.to_string(),
        format!("Received at: {}", now.format("%Y-%m-%d %H:%M:%S")),
        format!("File name: {name}"),
        format!("File path: {}", source.display()),
        String::new(),
        "OCR details:".to_string(),
        format!("  Characters: {}", report.char_count),
        format!("  Words: {}", report.word_count),
        format!("  Lines: {}", report.line_count),
        format!("  Language signal: {}", yes_no(report.has_language_signal)),
        String::new(),
        "Extracted text:".to_string(),
        SUB_RULE.to_string(),
        text.to_string(),
        String::new(),
        SUB_RULE.to_string(),
        "This message was sent automatically.".to_string(),
    ]
    .join("\n");

    Notification {
        kind: NotificationKind::Success,
        subject: subject_template.replace("{filename}", &name),
        body,
        file: Some(source.display().to_string()),
        metadata: Some(report.clone()),
    }
}

pub fn render_failure(message: &str, source: Option<&Path>, now: DateTime<Local>) -> Notification {
    let file = source.map(|p| p.display().to_string());
    let body = [
        "Document processing error".to_string(),
        RULE.to_string(),
        format!("Occurred at: {}", now.format("%Y-%m-%d %H:%M:%S")),
        format!("File: {}", file.as_deref().unwrap_or("N/A")),
        String::new(),
        "Error:".to_string(),
        message.to_string(),
        String::new(),
        "Please contact the system administrator.".to_string(),
    ]
    .join("\n");

    Notification {
        kind: NotificationKind::Error,
        subject: "Document processing error".to_string(),
        body,
        file,
        metadata: None,
    }
}

// ── Webhook transport ────────────────────────────────────────────────────────

/// JSON-over-HTTP notifier.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
    subject_template: String,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(config: &NotificationConfig) -> Result<Self, IngestError> {
        let url = config
            .webhook_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                IngestError::InvalidConfig("notification.webhook_url must be set".into())
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IngestError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
            subject_template: config.subject_template.clone(),
            retry: config.retry_policy(),
        })
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, &self.url);
        match self.auth_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn deliver(&self, notification: &Notification) -> bool {
        let max = self.retry.max_attempts;
        for attempt in 0..max {
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }
            info!(
                "Sending notification (attempt {}/{}): {}",
                attempt + 1,
                max,
                notification.subject
            );

            match self.request(reqwest::Method::POST).json(notification).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("Notification delivered to {}", self.url);
                    return true;
                }
                Ok(resp) => warn!(
                    "Notification attempt {} failed: HTTP {}",
                    attempt + 1,
                    resp.status()
                ),
                Err(e) => warn!("Notification attempt {} failed: {}", attempt + 1, e),
            }
        }
        error!("All notification attempts failed: {}", notification.subject);
        false
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_success(&self, source: &Path, text: &str, report: &ValidationReport) -> bool {
        let n = render_success(&self.subject_template, source, text, report, Local::now());
        self.deliver(&n).await
    }

    async fn notify_failure(&self, message: &str, source: Option<&Path>) -> bool {
        info!("Sending error notification");
        let n = render_failure(message, source, Local::now());
        self.deliver(&n).await
    }

    /// The endpoint must answer `HEAD` with 2xx, or 405 for webhooks that only
    /// take `POST`. Auth failures and unknown paths fail the gate.
    async fn test_connectivity(&self) -> bool {
        info!("Testing notification endpoint {}", self.url);
        match self.request(reqwest::Method::HEAD).send().await {
            Ok(resp) if is_reachable_status(resp.status()) => {
                info!("Notification endpoint reachable (HTTP {})", resp.status());
                true
            }
            Ok(resp) => {
                error!("Notification endpoint unhealthy: HTTP {}", resp.status());
                false
            }
            Err(e) => {
                error!("Notification connectivity test failed: {}", e);
                false
            }
        }
    }
}

fn is_reachable_status(status: reqwest::StatusCode) -> bool {
    status.is_success() || status == reqwest::StatusCode::METHOD_NOT_ALLOWED
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report() -> ValidationReport {
        ValidationReport {
            is_valid: true,
            char_count: 11,
            word_count: 2,
            line_count: 1,
            has_language_signal: false,
            language_ratio: 0.0,
            reason: None,
        }
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn success_subject_and_body() {
        let n = render_success(
            "Document received - {filename}",
            Path::new("/srv/scans/inbox/fax-001.tif"),
            "Hello world",
            &report(),
            at(),
        );
        assert_eq!(n.kind, NotificationKind::Success);
        assert_eq!(n.subject, "Document received - fax-001.tif");
        assert!(n.body.contains("Received at: 2026-03-14 09:26:53"));
        assert!(n.body.contains("File name: fax-001.tif"));
        assert!(n.body.contains("File path: /srv/scans/inbox/fax-001.tif"));
        assert!(n.body.contains("  Words: 2"));
        assert!(n.body.contains("  Language signal: no"));
        assert!(n.body.contains("\nHello world\n"));
        assert_eq!(n.metadata, Some(report()));
    }

    #[test]
    fn failure_without_file_shows_na() {
        let n = render_failure("Processing error: boom", None, at());
        assert_eq!(n.kind, NotificationKind::Error);
        assert_eq!(n.subject, "Document processing error");
        assert!(n.body.contains("File: N/A"));
        assert!(n.body.contains("Processing error: boom"));
        assert_eq!(n.file, None);
    }

    #[test]
    fn payload_serialises_kind_in_snake_case() {
        let n = render_failure("x", Some(Path::new("/a/b.tif")), at());
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["kind"], "error");
        assert_eq!(json["file"], "/a/b.tif");
        assert!(json["metadata"].is_null());
    }

    #[test]
    fn notifier_requires_url() {
        assert!(WebhookNotifier::new(&NotificationConfig::default()).is_err());
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_after_all_attempts() {
        let cfg = NotificationConfig {
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            max_attempts: 2,
            retry_delay_ms: 1,
            timeout_secs: 2,
            ..NotificationConfig::default()
        };
        let n = WebhookNotifier::new(&cfg).unwrap();
        assert!(!n.notify_failure("x", None).await);
        assert!(!n.test_connectivity().await);
    }

    /// Local endpoint answering every request with `status` and no body.
    async fn endpoint_answering(status: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let reply = format!(
                        "HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                    );
                    let _ = socket.write_all(reply.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}/hook")
    }

    fn notifier_for(url: String) -> WebhookNotifier {
        WebhookNotifier::new(&NotificationConfig {
            webhook_url: Some(url),
            auth_token: Some("wrong-token".into()),
            max_attempts: 1,
            retry_delay_ms: 1,
            timeout_secs: 5,
            ..NotificationConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn rejected_credentials_fail_the_connectivity_gate() {
        let n = notifier_for(endpoint_answering("401 Unauthorized").await);
        assert!(!n.test_connectivity().await);
        assert!(!n.notify_failure("x", None).await);
    }

    #[tokio::test]
    async fn unknown_path_fails_the_connectivity_gate() {
        let n = notifier_for(endpoint_answering("404 Not Found").await);
        assert!(!n.test_connectivity().await);
    }

    #[tokio::test]
    async fn post_only_endpoint_passes_the_connectivity_gate() {
        let n = notifier_for(endpoint_answering("405 Method Not Allowed").await);
        assert!(n.test_connectivity().await);
    }

    #[tokio::test]
    async fn healthy_endpoint_passes_the_connectivity_gate() {
        let n = notifier_for(endpoint_answering("204 No Content").await);
        assert!(n.test_connectivity().await);
    }

    #[test]
    fn reachable_status_policy() {
        use reqwest::StatusCode;
        assert!(is_reachable_status(StatusCode::OK));
        assert!(is_reachable_status(StatusCode::METHOD_NOT_ALLOWED));
        assert!(!is_reachable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_reachable_status(StatusCode::FORBIDDEN));
        assert!(!is_reachable_status(StatusCode::NOT_FOUND));
        assert!(!is_reachable_status(StatusCode::BAD_GATEWAY));
    }
}
