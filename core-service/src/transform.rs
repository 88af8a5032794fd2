//! # Transform Stage
//!
//! Runs the external transformation program and reads the summary file it
//! leaves behind.
//!
//! Exit code 0 is the only success signal. A non-zero exit fails the stage
//! with the captured stderr as the reason:
//!
//! ```text
//! Transform exited with code 1: parse error line 12
//! ```
//!
//! The summary file is optional. When it is missing, unreadable or older than
//! the run (left over from an earlier transform) the stage still succeeds
//! with `summary: None`.

use crate::{CoreError, Result};
use bridge_traits::transform::{TransformOutput, TransformRunner};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Lines of stdout kept on the result
const STDOUT_TAIL_LINES: usize = 20;

/// Clock slack when comparing the summary mtime with the run start
const SUMMARY_MTIME_SLACK: Duration = Duration::from_secs(2);

// ============================================================================
// Summary File
// ============================================================================

/// Contents of `conversion_summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionReport {
    pub conversion_summary: ConversionSummary,
    #[serde(default)]
    pub data_quality_notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSummary {
    /// RFC 3339, or a naive timestamp in local time
    pub timestamp: String,
    #[serde(default)]
    pub total_clients: u64,
    #[serde(default)]
    pub total_products: u64,
    #[serde(default)]
    pub total_clients_with_history: u64,
    #[serde(default)]
    pub files_created: BTreeMap<String, u64>,
}

impl ConversionReport {
    /// Timestamp of the transform run that wrote this report
    pub fn parsed_timestamp(&self) -> std::result::Result<DateTime<Utc>, SummaryError> {
        parse_summary_timestamp(&self.conversion_summary.timestamp)
    }
}

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("Summary file not found: {path}")]
    Missing { path: PathBuf },

    #[error("Failed to read summary file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid summary file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid summary timestamp '{value}'")]
    Timestamp { value: String },
}

/// Accepts RFC 3339 or a naive ISO timestamp interpreted in local time.
pub fn parse_summary_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, SummaryError> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let invalid = || SummaryError::Timestamp {
        value: value.to_string(),
    };
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| invalid())?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(invalid)
}

/// Read and parse the summary file.
pub async fn read_summary(path: &Path) -> std::result::Result<ConversionReport, SummaryError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SummaryError::Missing {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(SummaryError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&bytes).map_err(|source| SummaryError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// Stage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResult {
    pub exit_code: i32,
    pub duration_ms: u64,
    pub summary: Option<ConversionReport>,
    pub stdout_tail: String,
}

pub struct TransformStage {
    runner: Arc<dyn TransformRunner>,
    summary_path: PathBuf,
}

impl TransformStage {
    pub fn new(runner: Arc<dyn TransformRunner>, summary_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            summary_path: summary_path.into(),
        }
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    pub fn describe(&self) -> String {
        self.runner.describe()
    }

    /// Run the transform once.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Transform`] on a non-zero exit or signal termination
    /// - [`CoreError::Bridge`] when the program cannot be started or exceeds
    ///   its time limit
    #[instrument(skip(self), fields(program = %self.runner.describe()))]
    pub async fn run(&self) -> Result<TransformResult> {
        info!("Running transform");
        let started = SystemTime::now();
        let output = self.runner.run().await?;
        let duration_ms = output.duration.as_millis() as u64;

        let exit_code = match output.exit_code {
            Some(0) => 0,
            Some(code) => {
                return Err(CoreError::Transform(format!(
                    "Transform exited with code {}: {}",
                    code,
                    failure_reason(&output)
                )))
            }
            None => {
                return Err(CoreError::Transform(format!(
                    "Transform terminated by signal: {}",
                    failure_reason(&output)
                )))
            }
        };

        let current = written_since(&self.summary_path, started).await;
        let summary = match read_summary(&self.summary_path).await {
            Ok(_) if !current => {
                warn!(
                    path = %self.summary_path.display(),
                    "Ignoring summary file left over from an earlier run"
                );
                None
            }
            Ok(report) => Some(report),
            Err(SummaryError::Missing { path }) => {
                info!(path = %path.display(), "Transform wrote no summary file");
                None
            }
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable summary file");
                None
            }
        };

        info!(
            duration_ms,
            clients = ?summary.as_ref().map(|s| s.conversion_summary.total_clients),
            "Transform completed"
        );

        Ok(TransformResult {
            exit_code,
            duration_ms,
            summary,
            stdout_tail: tail_lines(&output.stdout, STDOUT_TAIL_LINES),
        })
    }
}

/// Whether `path` was modified at or after `started`. Unknown mtimes count
/// as recent.
async fn written_since(path: &Path, started: SystemTime) -> bool {
    let threshold = started.checked_sub(SUMMARY_MTIME_SLACK).unwrap_or(started);
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified >= threshold,
        Err(_) => true,
    }
}

fn failure_reason(output: &TransformOutput) -> String {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = tail_lines(&output.stdout, 5);
    if stdout.is_empty() {
        "no output".to_string()
    } else {
        stdout
    }
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

// ============================================================================
// Tests
// ============================================================================
