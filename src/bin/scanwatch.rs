//! CLI binary for edgequake-scanwatch.
//!
//! A thin shim over the library crate: load the TOML config, layer
//! environment/flag overrides on top, then run a health check, a single
//! scan, or the continuous watch loop.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_scanwatch::{health, logging, Config, CycleReport, Processor, Shutdown};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

const DEFAULT_CONFIG: &str = "scanwatch.toml";

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Watch continuously using ./scanwatch.toml
  scanwatch

  # Process whatever is in the inbox right now, then exit
  scanwatch --once -c /etc/scanwatch.toml

  # Same, with a machine-readable report on stdout
  scanwatch --once --json

  # Check every component without processing anything
  scanwatch --health-check

EXIT CODES:
  0  success / healthy
  1  fatal startup error / unhealthy
  2  --once run in which at least one file failed

ENVIRONMENT VARIABLES:
  SCANWATCH_CONFIG         Config file path (default: ./scanwatch.toml if present)
  SCANWATCH_WATCH_DIR      Override watch.directory
  SCANWATCH_WEBHOOK_URL    Override notification.webhook_url
  SCANWATCH_WEBHOOK_TOKEN  Override notification.auth_token
  SCANWATCH_OCR_BASE_URL   Override extraction.polling_api.base_url
  SCANWATCH_OCR_EMAIL      Override extraction.polling_api.email
  AZURE_VISION_ENDPOINT    Override extraction.azure_read.endpoint
  AZURE_VISION_KEY         Override extraction.azure_read.key
  GOOGLE_VISION_API_KEY    Override extraction.google_vision.api_key
  RUST_LOG                 Log filter (wins over logging.level, -v and -q)
"#;

/// Watch a directory for scanned documents, OCR them and send notifications.
#[derive(Parser, Debug)]
#[command(
    name = "scanwatch",
    version,
    about = "Watch a directory for scanned documents, OCR them and send notifications",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "SCANWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Run a single scan cycle and exit.
    #[arg(long, conflicts_with = "health_check")]
    once: bool,

    /// Report per-component health and exit.
    #[arg(long)]
    health_check: bool,

    /// Print the cycle or health report as JSON on stdout.
    #[arg(long, env = "SCANWATCH_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCANWATCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCANWATCH_QUIET", conflicts_with = "verbose")]
    quiet: bool,

    /// Watched directory.
    #[arg(long, env = "SCANWATCH_WATCH_DIR")]
    watch_dir: Option<PathBuf>,

    /// Notification webhook URL.
    #[arg(long, env = "SCANWATCH_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Bearer token for the notification webhook.
    #[arg(long, env = "SCANWATCH_WEBHOOK_TOKEN", hide_env_values = true)]
    webhook_token: Option<String>,

    /// Base URL of the upload/poll OCR API.
    #[arg(long, env = "SCANWATCH_OCR_BASE_URL")]
    ocr_base_url: Option<String>,

    /// Account e-mail sent with OCR uploads.
    #[arg(long, env = "SCANWATCH_OCR_EMAIL")]
    ocr_email: Option<String>,

    /// Azure Computer Vision endpoint.
    #[arg(long, env = "AZURE_VISION_ENDPOINT")]
    azure_endpoint: Option<String>,

    /// Azure Computer Vision key.
    #[arg(long, env = "AZURE_VISION_KEY", hide_env_values = true)]
    azure_key: Option<String>,

    /// Google Cloud Vision API key.
    #[arg(long, env = "GOOGLE_VISION_API_KEY", hide_env_values = true)]
    google_api_key: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(ref dir) = self.watch_dir {
            config.watch.directory = dir.clone();
        }
        let set = |slot: &mut Option<String>, value: &Option<String>| {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        };
        set(&mut config.notification.webhook_url, &self.webhook_url);
        set(&mut config.notification.auth_token, &self.webhook_token);
        set(&mut config.extraction.polling_api.base_url, &self.ocr_base_url);
        set(&mut config.extraction.polling_api.email, &self.ocr_email);
        set(&mut config.extraction.azure_read.endpoint, &self.azure_endpoint);
        set(&mut config.extraction.azure_read.key, &self.azure_key);
        set(&mut config.extraction.google_vision.api_key, &self.google_api_key);
    }

    fn log_filter<'a>(&self, config: &'a Config) -> &'a str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            &config.logging.level
        }
    }
}

/// Explicit path, else `./scanwatch.toml` when present, else defaults + env.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG).is_file() => PathBuf::from(DEFAULT_CONFIG),
        None => return Ok(Config::default()),
    };
    Config::from_file(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    let _log_guard = logging::init(cli.log_filter(&config), config.logging.directory.as_deref())
        .context("Failed to initialise logging")?;

    // ── Health check ─────────────────────────────────────────────────────
    if cli.health_check {
        let report = health::check(&config).await;
        if cli.json {
            let json = serde_json::to_string_pretty(&report)
                .context("Failed to serialise health report")?;
            println!("{json}");
        } else {
            print!("{}", report.render_text());
        }
        return Ok(if report.is_healthy() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        });
    }

    // ── Startup ──────────────────────────────────────────────────────────
    config.validate().context("Invalid configuration")?;
    let shutdown = Shutdown::new();
    let processor = Processor::from_config(config, Arc::clone(&shutdown))
        .context("Failed to initialise pipeline")?;
    processor
        .check_connectivity()
        .await
        .context("Startup connectivity check failed")?;

    // ── Single scan ──────────────────────────────────────────────────────
    if cli.once {
        let report = processor.run_cycle().await;
        if cli.json {
            let json = serde_json::to_string_pretty(&report)
                .context("Failed to serialise cycle report")?;
            println!("{json}");
        } else if !cli.quiet {
            print_summary(&report);
        }
        return Ok(if report.has_failures() {
            ExitCode::from(2)
        } else {
            ExitCode::SUCCESS
        });
    }

    // ── Continuous ───────────────────────────────────────────────────────
    shutdown.listen_for_signals();
    processor.run_continuous().await;
    Ok(ExitCode::SUCCESS)
}

fn print_summary(report: &CycleReport) {
    if report.discovered == 0 {
        eprintln!("{}", dim("No new files found"));
        return;
    }
    eprintln!(
        "Processed {} file(s) in {}ms: {} succeeded, {} failed",
        report.discovered,
        report.duration_ms,
        green(&report.succeeded.to_string()),
        if report.failed > 0 {
            red(&report.failed.to_string())
        } else {
            report.failed.to_string()
        },
    );
    for outcome in report.outcomes.iter().filter(|o| !o.success) {
        eprintln!(
            "  {} {} {}",
            red("✗"),
            outcome.path.display(),
            dim(&format!(
                "[{}] {}",
                outcome.failed_stage.map(|s| s.to_string()).unwrap_or_default(),
                outcome.error.as_deref().unwrap_or("")
            )),
        );
    }
}
