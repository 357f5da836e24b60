//! Values passed between pipeline stages and returned to callers.

use crate::pipeline::validate::ValidationReport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

/// A discovered document awaiting processing.
///
/// Created fresh by every scan and consumed by exactly one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

/// A temporary PDF derived 1:1 from a [`CandidateFile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedDocument {
    pub path: PathBuf,
    pub source: PathBuf,
    pub page_count: usize,
}

/// Pipeline stage at which a file stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Readiness,
    Conversion,
    ConversionValidation,
    Extraction,
    Notification,
    /// A panic escaped the per-file pipeline.
    Unexpected,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Readiness => "readiness",
            Stage::Conversion => "conversion",
            Stage::ConversionValidation => "conversion validation",
            Stage::Extraction => "extraction",
            Stage::Notification => "notification",
            Stage::Unexpected => "unexpected",
        };
        f.write_str(s)
    }
}

/// Terminal record for one file's pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub path: PathBuf,
    pub success: bool,
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
    /// Present once extraction produced text, valid or not.
    pub validation: Option<ValidationReport>,
    pub duration_ms: u64,
}

impl PipelineOutcome {
    pub fn succeeded(path: PathBuf, validation: ValidationReport, duration_ms: u64) -> Self {
        Self {
            path,
            success: true,
            failed_stage: None,
            error: None,
            validation: Some(validation),
            duration_ms,
        }
    }

    pub fn failed(path: PathBuf, stage: Stage, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            path,
            success: false,
            failed_stage: Some(stage),
            error: Some(error.into()),
            validation: None,
            duration_ms,
        }
    }
}

/// Summary of one scan cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub discovered: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<PipelineOutcome>,
    pub duration_ms: u64,
}

impl CycleReport {
    pub fn from_outcomes(
        discovered: usize,
        outcomes: Vec<PipelineOutcome>,
        duration_ms: u64,
    ) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        Self {
            discovered,
            succeeded,
            failed: outcomes.len() - succeeded,
            outcomes,
            duration_ms,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
