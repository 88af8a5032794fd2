//! Sync statistics
//!
//! Per-directory [`SyncStats`] and the per-pass [`SyncResult`]. Both are
//! created fresh for each call and returned by value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Why a file was fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchReason {
    /// No local copy
    New,
    /// Local copy is older than the remote file
    Stale,
    /// Local and remote sizes differ beyond the tolerance
    SizeMismatch,
    /// Local metadata could not be read
    LocalStatFailed,
}

impl FetchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchReason::New => "new",
            FetchReason::Stale => "stale",
            FetchReason::SizeMismatch => "size_mismatch",
            FetchReason::LocalStatFailed => "local_stat_failed",
        }
    }
}

impl fmt::Display for FetchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing a remote file with its local copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    Fetch(FetchReason),
    Skip,
}

/// A successfully fetched file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Name as listed remotely
    pub name: String,
    /// Normalized name used as the local storage key
    pub local_name: String,
    /// Bytes written locally
    pub size: u64,
    pub local_path: PathBuf,
    /// Remote path the bytes were actually read from
    pub remote_path: String,
    pub reason: FetchReason,
}

/// A file that failed every attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub name: String,
    pub remote_path: String,
    pub attempts: u32,
    pub error: String,
}

/// Statistics for one directory sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub directory: String,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub downloaded: usize,
    pub skipped: usize,
    pub errors: usize,
    pub files: Vec<FileInfo>,
    pub failures: Vec<FileFailure>,
    pub duration_ms: u64,
}

impl SyncStats {
    pub fn new(
        directory: impl Into<String>,
        remote_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            directory: directory.into(),
            remote_path: remote_path.into(),
            local_path: local_path.into(),
            downloaded: 0,
            skipped: 0,
            errors: 0,
            files: Vec::new(),
            failures: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Files decided so far
    pub fn processed(&self) -> usize {
        self.downloaded + self.skipped + self.errors
    }

    /// Share of processed files that failed, 0.0 when nothing was processed
    pub fn error_rate(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            processed => self.errors as f64 / processed as f64,
        }
    }

    pub(crate) fn record_fetched(&mut self, info: FileInfo) {
        self.downloaded += 1;
        self.files.push(info);
    }

    pub(crate) fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub(crate) fn record_failure(&mut self, failure: FileFailure) {
        self.errors += 1;
        self.failures.push(failure);
    }
}

/// Totals across the directories of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTotals {
    pub downloaded: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Result of a full sync pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub addresses: SyncStats,
    pub articles: SyncStats,
    pub history: SyncStats,
    pub totals: SyncTotals,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SyncResult {
    /// Assemble a result, summing the totals from the three directories.
    pub fn new(
        addresses: SyncStats,
        articles: SyncStats,
        history: SyncStats,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let totals = [&addresses, &articles, &history]
            .iter()
            .fold(SyncTotals::default(), |acc, stats| SyncTotals {
                downloaded: acc.downloaded + stats.downloaded,
                skipped: acc.skipped + stats.skipped,
                errors: acc.errors + stats.errors,
            });
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        Self {
            addresses,
            articles,
            history,
            totals,
            started_at,
            finished_at,
            duration_ms,
        }
    }

    /// Directory stats in pass order
    pub fn directories(&self) -> [&SyncStats; 3] {
        [&self.addresses, &self.articles, &self.history]
    }
}

/// Result of a connection test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTestReport {
    pub success: bool,
    pub message: String,
    pub endpoint: String,
    pub remote_root: String,
    pub entries_found: Option<usize>,
    pub tested_at: DateTime<Utc>,
    pub duration_ms: u64,
}
