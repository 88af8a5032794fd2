//! # Directory Sync Engine
//!
//! Mirrors one flat remote directory into a local directory.
//!
//! ## Workflow
//!
//! 1. Create the local directory
//! 2. Make sure the connection is live, list the remote directory with retries
//!    and keep regular files only
//! 3. Split the files into batches; before each batch verify (or periodically
//!    refresh) the connection
//! 4. Per file compare with the local copy at `local_dir/normalize(name)` and
//!    fetch when missing, stale or differently sized. A second remote file
//!    whose name normalizes to an already claimed local name is recorded as
//!    a failure and never fetched
//! 5. Retry failed fetches with backoff; a "not found" instead walks the
//!    alternative remote names once each
//! 6. Pause between files and between batches, longer while the error rate is
//!    high
//!
//! Per-file failures are recorded in [`SyncStats::failures`] and never stop
//! the remaining files. Only directory-level failures return an error.

use crate::{
    normalizer::{alternative_remote_names, normalize_filename},
    retry::{retry_with_backoff, RetryError, RetryPolicy},
    stats::{FetchDecision, FetchReason, FileFailure, FileInfo, SyncStats},
    Result, SyncError,
};
use bridge_traits::{
    error::BridgeError,
    transfer::{join_remote_path, RemoteFileEntry, TransferClient},
};
use chrono::{DateTime, Utc};
use core_runtime::config::SyncSettings;
use core_runtime::events::{ConnectionEvent, CoreEvent, EventBus, SyncEvent};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Connect with the given policy, emitting connection events.
pub(crate) async fn connect_with_retry(
    client: &dyn TransferClient,
    policy: &RetryPolicy,
    event_bus: &EventBus,
) -> Result<()> {
    let endpoint = client.endpoint();
    let started = Instant::now();

    let outcome = retry_with_backoff(policy, "connect", BridgeError::is_retryable, |attempt| {
        event_bus
            .emit(CoreEvent::Connection(ConnectionEvent::Connecting {
                endpoint: endpoint.clone(),
                attempt,
            }))
            .ok();
        client.connect()
    })
    .await;

    match outcome {
        Ok(()) => {
            info!(endpoint = %endpoint, elapsed_ms = started.elapsed().as_millis() as u64, "Connected");
            event_bus
                .emit(CoreEvent::Connection(ConnectionEvent::Connected {
                    endpoint,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }))
                .ok();
            Ok(())
        }
        Err(RetryError {
            attempts,
            last_error,
        }) => {
            event_bus
                .emit(CoreEvent::Connection(ConnectionEvent::Failed {
                    endpoint: endpoint.clone(),
                    message: last_error.to_string(),
                }))
                .ok();
            Err(SyncError::Connection {
                endpoint,
                attempts,
                source: last_error,
            })
        }
    }
}

/// Syncs one remote directory into one local directory
pub struct DirectorySyncEngine {
    client: Arc<dyn TransferClient>,
    settings: SyncSettings,
    event_bus: Arc<EventBus>,
}

impl DirectorySyncEngine {
    pub fn new(
        client: Arc<dyn TransferClient>,
        settings: SyncSettings,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            client,
            settings,
            event_bus,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Mirror `remote_dir` into `local_dir`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::LocalIo`] when the local directory cannot be created
    /// - [`SyncError::Connection`] when the connection cannot be (re)established
    /// - [`SyncError::Listing`] when the listing fails after all retries
    #[instrument(skip(self, local_dir), fields(local_dir = %local_dir.display()))]
    pub async fn sync(&self, remote_dir: &str, local_dir: &Path) -> Result<SyncStats> {
        let started = Instant::now();
        let directory = directory_label(remote_dir);
        let mut stats = SyncStats::new(directory.clone(), remote_dir, local_dir);

        self.emit(SyncEvent::DirectoryStarted {
            directory: directory.clone(),
            remote_path: remote_dir.to_string(),
        });

        let outcome = self.run(remote_dir, local_dir, &mut stats).await;
        stats.duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                info!(
                    directory = %directory,
                    downloaded = stats.downloaded,
                    skipped = stats.skipped,
                    errors = stats.errors,
                    duration_ms = stats.duration_ms,
                    "Directory sync completed"
                );
                self.emit(SyncEvent::DirectoryCompleted {
                    directory,
                    downloaded: stats.downloaded,
                    skipped: stats.skipped,
                    errors: stats.errors,
                    duration_ms: stats.duration_ms,
                });
                Ok(stats)
            }
            Err(e) => {
                warn!(directory = %directory, error = %e, "Directory sync failed");
                self.emit(SyncEvent::DirectoryFailed {
                    directory,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(&self, remote_dir: &str, local_dir: &Path, stats: &mut SyncStats) -> Result<()> {
        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(|e| SyncError::local_io(local_dir, e))?;

        self.ensure_connected().await?;
        let files = self.list_files(remote_dir).await?;

        let batch_size = self.settings.batch_size.max(1);
        let batch_count = files.len().div_ceil(batch_size);

        self.emit(SyncEvent::DirectoryListed {
            directory: stats.directory.clone(),
            files: files.len(),
            batches: batch_count,
        });

        if files.is_empty() {
            debug!(remote_dir, "Remote directory has no files");
            return Ok(());
        }

        let mut claimed = HashSet::with_capacity(files.len());
        for (batch_index, batch) in files.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                self.pause_between_batches(stats).await;
            }
            self.prepare_batch(batch_index).await?;

            debug!(
                batch = batch_index + 1,
                batch_count,
                files = batch.len(),
                "Processing batch"
            );

            for (file_index, entry) in batch.iter().enumerate() {
                if file_index > 0 && !self.settings.file_delay.is_zero() {
                    sleep(self.settings.file_delay).await;
                }
                self.process_file(remote_dir, local_dir, entry, &mut claimed, stats)
                    .await;
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Connection handling
    // ------------------------------------------------------------------------

    async fn ensure_connected(&self) -> Result<()> {
        if self.client.is_connected().await {
            return Ok(());
        }
        debug!("Connection not live, reconnecting");
        connect_with_retry(
            self.client.as_ref(),
            &RetryPolicy::connect(&self.settings),
            &self.event_bus,
        )
        .await
    }

    /// Verify the connection before a batch, refreshing it every
    /// `refresh_every_batches` batches.
    async fn prepare_batch(&self, batch_index: usize) -> Result<()> {
        let refresh_every = self.settings.refresh_every_batches;
        if batch_index > 0 && refresh_every > 0 && batch_index % refresh_every == 0 {
            let endpoint = self.client.endpoint();
            info!(endpoint = %endpoint, batches_done = batch_index, "Refreshing connection");

            if let Err(e) = self.client.disconnect().await {
                warn!(error = %e, "Disconnect before refresh failed");
            }
            connect_with_retry(
                self.client.as_ref(),
                &RetryPolicy::connect(&self.settings),
                &self.event_bus,
            )
            .await?;

            self.event_bus
                .emit(CoreEvent::Connection(ConnectionEvent::Refreshed {
                    endpoint,
                    batches_done: batch_index,
                }))
                .ok();
            return Ok(());
        }

        self.ensure_connected().await
    }

    // ------------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------------

    async fn list_files(&self, remote_dir: &str) -> Result<Vec<RemoteFileEntry>> {
        let policy = RetryPolicy::list(&self.settings);
        let client = self.client.as_ref();

        let entries = retry_with_backoff(&policy, "list", BridgeError::is_retryable, |attempt| async move {
            if attempt > 1 && !client.is_connected().await {
                client.connect().await?;
            }
            client.list(remote_dir).await
        })
        .await
        .map_err(|e| SyncError::Listing {
            directory: remote_dir.to_string(),
            attempts: e.attempts,
            source: e.last_error,
        })?;

        let total = entries.len();
        let files: Vec<RemoteFileEntry> = entries.into_iter().filter(|e| e.is_file()).collect();
        debug!(remote_dir, total, files = files.len(), "Listed remote directory");

        Ok(files)
    }

    // ------------------------------------------------------------------------
    // Per-file processing
    // ------------------------------------------------------------------------

    /// Compare a remote entry with its local copy.
    pub async fn decide(&self, entry: &RemoteFileEntry, local_path: &Path) -> FetchDecision {
        let metadata = match tokio::fs::metadata(local_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return FetchDecision::Fetch(FetchReason::New)
            }
            Err(e) => {
                warn!(path = %local_path.display(), error = %e, "Failed to stat local file");
                return FetchDecision::Fetch(FetchReason::LocalStatFailed);
            }
        };

        if let (Some(remote_modified), Ok(local_modified)) = (entry.modified_at, metadata.modified())
        {
            if DateTime::<Utc>::from(local_modified) < remote_modified {
                return FetchDecision::Fetch(FetchReason::Stale);
            }
        }

        if metadata.len().abs_diff(entry.size) > self.settings.size_tolerance(entry.size) {
            return FetchDecision::Fetch(FetchReason::SizeMismatch);
        }

        FetchDecision::Skip
    }

    async fn process_file(
        &self,
        remote_dir: &str,
        local_dir: &Path,
        entry: &RemoteFileEntry,
        claimed: &mut HashSet<String>,
        stats: &mut SyncStats,
    ) {
        let local_name = normalize_filename(&entry.name);
        if !claimed.insert(local_name.clone()) {
            let message = format!(
                "Local file {} is already targeted by another remote file in this pass",
                local_name
            );
            warn!(file = %entry.name, local_name = %local_name, "Duplicate local name, not fetching");
            self.emit(SyncEvent::FileFailed {
                directory: stats.directory.clone(),
                file: entry.name.clone(),
                attempts: 0,
                message: message.clone(),
            });
            stats.record_failure(FileFailure {
                name: entry.name.clone(),
                remote_path: join_remote_path(remote_dir, &entry.name),
                attempts: 0,
                error: message,
            });
            return;
        }
        let local_path = local_dir.join(&local_name);

        let reason = match self.decide(entry, &local_path).await {
            FetchDecision::Skip => {
                debug!(file = %entry.name, "Unchanged, skipping");
                stats.record_skipped();
                return;
            }
            FetchDecision::Fetch(reason) => reason,
        };

        let remote_path = join_remote_path(remote_dir, &entry.name);
        debug!(file = %entry.name, reason = %reason, "Fetching");

        match self.fetch_with_fallback(remote_dir, &entry.name, &local_path).await {
            Ok((fetched_from, bytes)) => {
                self.emit(SyncEvent::FileFetched {
                    directory: stats.directory.clone(),
                    file: local_name.clone(),
                    bytes,
                    reason: reason.to_string(),
                });
                stats.record_fetched(FileInfo {
                    name: entry.name.clone(),
                    local_name,
                    size: bytes,
                    local_path,
                    remote_path: fetched_from,
                    reason,
                });
            }
            Err(RetryError {
                attempts,
                last_error,
            }) => {
                warn!(
                    file = %entry.name,
                    attempts,
                    error = %last_error,
                    "Giving up on file"
                );
                self.emit(SyncEvent::FileFailed {
                    directory: stats.directory.clone(),
                    file: entry.name.clone(),
                    attempts,
                    message: last_error.to_string(),
                });
                stats.record_failure(FileFailure {
                    name: entry.name.clone(),
                    remote_path,
                    attempts,
                    error: last_error.to_string(),
                });
            }
        }
    }

    /// Fetch under the listed name, then under each alternative name once
    /// if the remote reports the listed name as missing.
    ///
    /// Returns the remote path that succeeded and the bytes written.
    async fn fetch_with_fallback(
        &self,
        remote_dir: &str,
        name: &str,
        local_path: &Path,
    ) -> std::result::Result<(String, u64), RetryError<BridgeError>> {
        let remote_path = join_remote_path(remote_dir, name);

        let failure = match self.fetch_with_retry(&remote_path, local_path).await {
            Ok(bytes) => return Ok((remote_path, bytes)),
            Err(failure) if failure.last_error.is_not_found() => failure,
            Err(failure) => return Err(failure),
        };

        let mut attempts = failure.attempts;
        for candidate in alternative_remote_names(name) {
            let candidate_path = join_remote_path(remote_dir, &candidate);
            attempts += 1;
            debug!(file = %name, candidate = %candidate, "Trying alternative remote name");

            match self.fetch_once(&candidate_path, local_path).await {
                Ok(bytes) => {
                    info!(file = %name, remote_path = %candidate_path, "Fetched under alternative name");
                    return Ok((candidate_path, bytes));
                }
                Err(e) => debug!(candidate = %candidate, error = %e, "Alternative name failed"),
            }
        }

        Err(RetryError {
            attempts,
            last_error: failure.last_error,
        })
    }

    async fn fetch_with_retry(
        &self,
        remote_path: &str,
        local_path: &Path,
    ) -> std::result::Result<u64, RetryError<BridgeError>> {
        let policy = RetryPolicy::fetch(&self.settings);
        retry_with_backoff(&policy, "fetch", BridgeError::is_retryable, |_| {
            self.fetch_once(remote_path, local_path)
        })
        .await
    }

    async fn fetch_once(&self, remote_path: &str, local_path: &Path) -> bridge_traits::error::Result<u64> {
        if !self.client.is_connected().await {
            self.client.connect().await?;
        }
        self.client.fetch(remote_path, local_path).await
    }

    // ------------------------------------------------------------------------
    // Pacing
    // ------------------------------------------------------------------------

    /// Delay before the next batch, multiplied while the error rate exceeds
    /// the threshold.
    pub fn batch_delay(&self, stats: &SyncStats) -> Duration {
        let base = self.settings.batch_delay;
        if stats.error_rate() > self.settings.error_rate_threshold {
            base.saturating_mul(self.settings.error_delay_multiplier.max(1))
        } else {
            base
        }
    }

    async fn pause_between_batches(&self, stats: &SyncStats) {
        let delay = self.batch_delay(stats);
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, error_rate = stats.error_rate(), "Pausing between batches");
            sleep(delay).await;
        }
    }

    fn emit(&self, event: SyncEvent) {
        self.event_bus.emit(CoreEvent::Sync(event)).ok();
    }
}

/// Last segment of a remote path, used to label a directory
fn directory_label(remote_dir: &str) -> String {
    remote_dir
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("/")
        .to_string()
}
