//! # Core Configuration Module
//!
//! Provides the validated configuration object for the sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! [`CoreConfig`] instance holding every setting the engine needs: the remote
//! endpoint and its credentials, local storage layout, sync tuning, the
//! transform invocation and the schedule. `build()` validates everything up
//! front.
//!
//! Loading values from files or the environment is the host's job; this
//! module only defines the shape and the rules.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, RemoteAuth, RemoteEndpointConfig};
//! use secrecy::SecretString;
//!
//! let remote = RemoteEndpointConfig::new(
//!     "files.example.com",
//!     "sync",
//!     RemoteAuth::Password(SecretString::from("secret")),
//! )
//! .with_port(2222);
//!
//! let config = CoreConfig::builder()
//!     .remote(remote)
//!     .data_root("/srv/data")
//!     .build()?;
//!
//! assert!(config.mirror_root.ends_with("susko.ai"));
//! ```
//!
//! ## Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | Connect timeout | 60 s (1 to 600 s allowed) |
//! | Batch size | 20 files |
//! | Attempts (connect, list, fetch) | 3 each |
//! | Backoff | exponential, 1 s base, 10 s cap |
//! | Delay between files / batches | 100 ms / 500 ms |
//! | Error-rate slowdown | above 20 %, batch delay ×4 |
//! | Proactive reconnect | every 5 batches |
//! | Stall timeout | 30 s |
//! | Size tolerance | max(10 bytes, 1 %) |
//! | Transform timeout | 300 s |
//! | Pipeline / probe schedule | `0 2 * * *` / `0 * * * *` |
//! | Freshness tolerance | 25 h |
//! | Job history | 50 entries |

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

/// Local directory that mirrors the remote tree, relative to the data root.
pub const DEFAULT_MIRROR_DIR: &str = "susko.ai";

/// Summary file the transform writes, relative to the data root.
pub const DEFAULT_SUMMARY_FILE: &str = "conversion_summary.json";

const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(600);

// ============================================================================
// Remote endpoint
// ============================================================================

/// How the adapter authenticates against the remote endpoint.
#[derive(Debug, Clone)]
pub enum RemoteAuth {
    Password(SecretString),

    /// Private key file with optional passphrase
    KeyFile {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },

    /// Identities offered by a running SSH agent
    Agent,
}

impl RemoteAuth {
    /// Short label for logs; never includes secret material.
    pub fn mode(&self) -> &'static str {
        match self {
            RemoteAuth::Password(_) => "password",
            RemoteAuth::KeyFile { .. } => "key-file",
            RemoteAuth::Agent => "agent",
        }
    }
}

/// Names of the three remote data directories.
///
/// They are always synced in this order: addresses, articles, history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDirectories {
    pub addresses: String,
    pub articles: String,
    pub history: String,
}

impl Default for RemoteDirectories {
    fn default() -> Self {
        Self {
            addresses: "Adressen".to_string(),
            articles: "Artikel".to_string(),
            history: "History".to_string(),
        }
    }
}

impl RemoteDirectories {
    /// `(label, remote name)` pairs in sync order.
    pub fn ordered(&self) -> [(&'static str, &str); 3] {
        [
            ("addresses", self.addresses.as_str()),
            ("articles", self.articles.as_str()),
            ("history", self.history.as_str()),
        ]
    }
}

/// Remote endpoint settings.
#[derive(Debug, Clone)]
pub struct RemoteEndpointConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: RemoteAuth,
    /// Directory that contains the three data directories
    pub root_dir: String,
    pub directories: RemoteDirectories,
    /// Upper bound for establishing a ready session
    pub connect_timeout: Duration,
}

impl RemoteEndpointConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>, auth: RemoteAuth) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            auth,
            root_dir: "/".to_string(),
            directories: RemoteDirectories::default(),
            connect_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_root_dir(mut self, root_dir: impl Into<String>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    pub fn with_directories(mut self, directories: RemoteDirectories) -> Self {
        self.directories = directories;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("Remote host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(Error::Config("Remote port must be greater than 0".to_string()));
        }

        if self.username.trim().is_empty() {
            return Err(Error::Config("Remote username cannot be empty".to_string()));
        }

        if self.connect_timeout < MIN_CONNECT_TIMEOUT || self.connect_timeout > MAX_CONNECT_TIMEOUT
        {
            return Err(Error::Config(format!(
                "Connect timeout must be between {}s and {}s, got {}ms",
                MIN_CONNECT_TIMEOUT.as_secs(),
                MAX_CONNECT_TIMEOUT.as_secs(),
                self.connect_timeout.as_millis()
            )));
        }

        if let RemoteAuth::KeyFile { path, .. } = &self.auth {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("Key file path cannot be empty".to_string()));
            }
        }

        for (label, name) in self.directories.ordered() {
            if name.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Remote {} directory name cannot be empty",
                    label
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Sync tuning
// ============================================================================

/// Tuning knobs for the directory sync engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Files per batch
    pub batch_size: usize,
    pub connect_attempts: u32,
    pub list_attempts: u32,
    pub fetch_attempts: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Pause after each file
    pub file_delay: Duration,
    /// Pause between batches
    pub batch_delay: Duration,
    /// Fraction of failed files (0.0 to 1.0) above which batches slow down
    pub error_rate_threshold: f64,
    pub error_delay_multiplier: u32,
    /// Reconnect proactively after this many batches; 0 disables
    pub refresh_every_batches: usize,
    /// Abort a fetch when no chunk arrives within this window
    pub stall_timeout: Duration,
    /// Size difference tolerated before re-fetching, as a percentage of the remote size
    pub size_tolerance_percent: f64,
    /// Lower bound for the size tolerance
    pub size_tolerance_floor_bytes: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            connect_attempts: 3,
            list_attempts: 3,
            fetch_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
            file_delay: Duration::from_millis(100),
            batch_delay: Duration::from_millis(500),
            error_rate_threshold: 0.20,
            error_delay_multiplier: 4,
            refresh_every_batches: 5,
            stall_timeout: Duration::from_secs(30),
            size_tolerance_percent: 1.0,
            size_tolerance_floor_bytes: 10,
        }
    }
}

impl SyncSettings {
    /// Settings with every delay set to zero, for tests.
    pub fn without_delays() -> Self {
        Self {
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
            file_delay: Duration::ZERO,
            batch_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Largest size difference that still counts as "unchanged".
    pub fn size_tolerance(&self, remote_size: u64) -> u64 {
        let relative = (remote_size as f64 * self.size_tolerance_percent / 100.0) as u64;
        relative.max(self.size_tolerance_floor_bytes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("Batch size must be greater than 0".to_string()));
        }

        for (name, attempts) in [
            ("connect", self.connect_attempts),
            ("list", self.list_attempts),
            ("fetch", self.fetch_attempts),
        ] {
            if attempts == 0 {
                return Err(Error::Config(format!(
                    "At least one {} attempt is required",
                    name
                )));
            }
        }

        if self.backoff_max < self.backoff_base {
            return Err(Error::Config(
                "Maximum backoff cannot be smaller than the base backoff".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(Error::Config(
                "Error rate threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.error_delay_multiplier == 0 {
            return Err(Error::Config(
                "Error delay multiplier must be at least 1".to_string(),
            ));
        }

        if self.stall_timeout.is_zero() {
            return Err(Error::Config(
                "Stall timeout must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.size_tolerance_percent) {
            return Err(Error::Config(
                "Size tolerance percent must be between 0 and 100".to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Transform
// ============================================================================

/// How to invoke the external transformation program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformSettings {
    /// Executable path or bare name resolved through `PATH`
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; defaults to the data root's parent when unset
    pub working_dir: Option<PathBuf>,
    /// Wall-clock ceiling for one invocation
    pub timeout: Duration,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["convert.py".to_string()],
            working_dir: None,
            timeout: Duration::from_secs(300),
        }
    }
}

impl TransformSettings {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::Config(
                "Transform program cannot be empty".to_string(),
            ));
        }

        if self.timeout.is_zero() {
            return Err(Error::Config(
                "Transform timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// Recurring trigger settings. Cron expressions are parsed by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    /// Five-field cron expression for the full pipeline
    pub pipeline_cron: String,
    /// Five-field cron expression for the freshness probe
    pub freshness_cron: String,
    /// Maximum age of the last transform before data counts as stale
    pub freshness_tolerance: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            pipeline_cron: "0 2 * * *".to_string(),
            freshness_cron: "0 * * * *".to_string(),
            freshness_tolerance: Duration::from_secs(25 * 60 * 60),
        }
    }
}

impl ScheduleSettings {
    pub fn validate(&self) -> Result<()> {
        if self.pipeline_cron.split_whitespace().count() != 5 {
            return Err(Error::Config(format!(
                "Pipeline schedule must have five cron fields: '{}'",
                self.pipeline_cron
            )));
        }

        if self.freshness_cron.split_whitespace().count() != 5 {
            return Err(Error::Config(format!(
                "Freshness schedule must have five cron fields: '{}'",
                self.freshness_cron
            )));
        }

        if self.freshness_tolerance.is_zero() {
            return Err(Error::Config(
                "Freshness tolerance must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// CoreConfig
// ============================================================================

/// Core configuration for the sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub remote: RemoteEndpointConfig,

    /// Root of all local state
    pub data_root: PathBuf,

    /// Local mirror of the remote tree
    pub mirror_root: PathBuf,

    /// Summary file written by the transform
    pub summary_path: PathBuf,

    pub sync: SyncSettings,

    pub transform: TransformSettings,

    pub schedule: ScheduleSettings,

    /// Number of finished jobs kept in memory
    pub history_capacity: usize,
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        self.remote.validate()?;

        if self.data_root.as_os_str().is_empty() {
            return Err(Error::Config("Data root cannot be empty".to_string()));
        }

        if self.mirror_root.as_os_str().is_empty() {
            return Err(Error::Config("Mirror root cannot be empty".to_string()));
        }

        if self.summary_path.as_os_str().is_empty() {
            return Err(Error::Config("Summary path cannot be empty".to_string()));
        }

        self.sync.validate()?;
        self.transform.validate()?;
        self.schedule.validate()?;

        if self.history_capacity == 0 {
            return Err(Error::Config(
                "History capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Directory the transform runs in: the configured one, else the data
    /// root's parent, else the data root itself.
    pub fn transform_working_dir(&self) -> PathBuf {
        if let Some(dir) = &self.transform.working_dir {
            return dir.clone();
        }
        self.data_root
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_root.clone())
    }
}

/// Builder for [`CoreConfig`].
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    remote: Option<RemoteEndpointConfig>,
    data_root: Option<PathBuf>,
    mirror_root: Option<PathBuf>,
    summary_path: Option<PathBuf>,
    sync: Option<SyncSettings>,
    transform: Option<TransformSettings>,
    schedule: Option<ScheduleSettings>,
    history_capacity: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the remote endpoint (required).
    pub fn remote(mut self, remote: RemoteEndpointConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the local data root (required).
    pub fn data_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_root = Some(path.into());
        self
    }

    /// Overrides the mirror root. Default: `<data_root>/susko.ai`.
    pub fn mirror_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.mirror_root = Some(path.into());
        self
    }

    /// Overrides the summary file. Default: `<data_root>/conversion_summary.json`.
    pub fn summary_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.summary_path = Some(path.into());
        self
    }

    pub fn sync_settings(mut self, settings: SyncSettings) -> Self {
        self.sync = Some(settings);
        self
    }

    pub fn transform(mut self, settings: TransformSettings) -> Self {
        self.transform = Some(settings);
        self
    }

    pub fn schedule(mut self, settings: ScheduleSettings) -> Self {
        self.schedule = Some(settings);
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = Some(capacity);
        self
    }

    /// Builds and validates the final `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a required field is missing or any
    /// value is out of range.
    pub fn build(self) -> Result<CoreConfig> {
        let remote = self.remote.ok_or_else(|| {
            Error::Config("Remote endpoint is required. Use .remote() to set it.".to_string())
        })?;

        let data_root = self.data_root.ok_or_else(|| {
            Error::Config("Data root is required. Use .data_root() to set it.".to_string())
        })?;

        let mirror_root = self
            .mirror_root
            .unwrap_or_else(|| data_root.join(DEFAULT_MIRROR_DIR));
        let summary_path = self
            .summary_path
            .unwrap_or_else(|| data_root.join(DEFAULT_SUMMARY_FILE));

        let config = CoreConfig {
            remote,
            data_root,
            mirror_root,
            summary_path,
            sync: self.sync.unwrap_or_default(),
            transform: self.transform.unwrap_or_default(),
            schedule: self.schedule.unwrap_or_default(),
            history_capacity: self.history_capacity.unwrap_or(50),
        };

        config.validate()?;

        Ok(config)
    }
}
