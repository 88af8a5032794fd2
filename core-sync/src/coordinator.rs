//! # Sync Coordinator
//!
//! Runs a full sync pass over the three remote directories and tests the
//! remote connection.
//!
//! ## Overview
//!
//! The `SyncCoordinator` owns the pass lifecycle:
//! - Connect using the connect retry policy
//! - Sync addresses, articles and history, in that order, each from
//!   `<root>/<dir>` into `<mirror_root>/<normalized dir>`
//! - Sum the totals into a [`SyncResult`]
//! - Disconnect on the way out, whether the pass succeeded or not
//!
//! Only one pass or connection test runs at a time per coordinator. A second
//! caller gets [`SyncError::SyncInProgress`] immediately.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::SyncCoordinator;
//! use std::sync::Arc;
//!
//! let coordinator = SyncCoordinator::new(&config, client, event_bus, clock);
//!
//! let report = coordinator.test_connection().await?;
//! if report.success {
//!     let result = coordinator.sync_all().await?;
//!     println!("{} files downloaded", result.totals.downloaded);
//! }
//! ```

use crate::{
    engine::{connect_with_retry, DirectorySyncEngine},
    normalizer::normalize_filename,
    retry::RetryPolicy,
    stats::{ConnectionTestReport, SyncResult, SyncStats},
    Result, SyncError,
};
use bridge_traits::{
    time::Clock,
    transfer::{join_remote_path, TransferClient},
};
use core_runtime::config::{CoreConfig, RemoteEndpointConfig, SyncSettings};
use core_runtime::events::{ConnectionEvent, CoreEvent, EventBus, SyncEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, info, instrument, warn};

/// Coordinates sync passes over one transfer client
pub struct SyncCoordinator {
    client: Arc<dyn TransferClient>,
    remote: RemoteEndpointConfig,
    mirror_root: PathBuf,
    settings: SyncSettings,
    engine: DirectorySyncEngine,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    /// Held for the duration of a pass or connection test
    in_flight: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(
        config: &CoreConfig,
        client: Arc<dyn TransferClient>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine =
            DirectorySyncEngine::new(client.clone(), config.sync.clone(), event_bus.clone());

        Self {
            client,
            remote: config.remote.clone(),
            mirror_root: config.mirror_root.clone(),
            settings: config.sync.clone(),
            engine,
            event_bus,
            clock,
            in_flight: Mutex::new(()),
        }
    }

    /// Whether a pass or connection test is currently running
    pub fn is_busy(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    pub fn endpoint(&self) -> String {
        self.client.endpoint()
    }

    fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        self.in_flight
            .try_lock()
            .map_err(|_| SyncError::SyncInProgress {
                endpoint: self.client.endpoint(),
            })
    }

    /// Remote and local locations of each directory, in pass order
    pub fn directory_plan(&self) -> [(&'static str, String, PathBuf); 3] {
        self.remote.directories.ordered().map(|(label, dir)| {
            (
                label,
                join_remote_path(&self.remote.root_dir, dir),
                self.mirror_root.join(normalize_filename(dir)),
            )
        })
    }

    /// Run one full sync pass.
    ///
    /// # Errors
    ///
    /// - [`SyncError::SyncInProgress`] when another pass or test is running
    /// - [`SyncError::Connection`] when the initial connect fails
    /// - Any directory-level error, which aborts the pass after disconnecting
    #[instrument(skip(self), fields(endpoint = %self.client.endpoint()))]
    pub async fn sync_all(&self) -> Result<SyncResult> {
        let _guard = self.acquire()?;
        let started_at = self.clock.now();
        let started = Instant::now();

        info!("Starting sync pass");
        self.emit(SyncEvent::PassStarted {
            endpoint: self.client.endpoint(),
        });

        let outcome = match connect_with_retry(
            self.client.as_ref(),
            &RetryPolicy::connect(&self.settings),
            &self.event_bus,
        )
        .await
        {
            Ok(()) => self.run_directories().await,
            Err(e) => Err(e),
        };

        self.disconnect().await;

        let [addresses, articles, history] = match outcome {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Sync pass aborted");
                return Err(e);
            }
        };

        let result = SyncResult::new(addresses, articles, history, started_at, self.clock.now());

        info!(
            downloaded = result.totals.downloaded,
            skipped = result.totals.skipped,
            errors = result.totals.errors,
            duration_ms = started.elapsed().as_millis() as u64,
            "Sync pass completed"
        );
        self.emit(SyncEvent::PassCompleted {
            downloaded: result.totals.downloaded,
            skipped: result.totals.skipped,
            errors: result.totals.errors,
            duration_ms: result.duration_ms,
        });

        Ok(result)
    }

    async fn run_directories(&self) -> Result<[SyncStats; 3]> {
        let [addresses, articles, history] = self.directory_plan();
        Ok([
            self.sync_directory(addresses).await?,
            self.sync_directory(articles).await?,
            self.sync_directory(history).await?,
        ])
    }

    async fn sync_directory(
        &self,
        (label, remote_path, local_path): (&'static str, String, PathBuf),
    ) -> Result<SyncStats> {
        info!(directory = label, remote_path = %remote_path, "Syncing directory");
        self.engine.sync(&remote_path, &local_path).await
    }

    /// Connect once, list the remote root and disconnect.
    ///
    /// Never touches local files and never leaves the client connected.
    /// Connection problems are reported in the returned report, not as an
    /// error.
    ///
    /// # Errors
    ///
    /// [`SyncError::SyncInProgress`] when a pass is running.
    #[instrument(skip(self), fields(endpoint = %self.client.endpoint()))]
    pub async fn test_connection(&self) -> Result<ConnectionTestReport> {
        let _guard = self.acquire()?;
        let tested_at = self.clock.now();
        let started = Instant::now();
        let endpoint = self.client.endpoint();
        let remote_root = self.remote.root_dir.clone();

        let outcome = match connect_with_retry(
            self.client.as_ref(),
            &RetryPolicy::single_attempt(),
            &self.event_bus,
        )
        .await
        {
            Ok(()) => self
                .client
                .list(&remote_root)
                .await
                .map(|entries| entries.len())
                .map_err(SyncError::Bridge),
            Err(e) => Err(e),
        };

        self.disconnect().await;

        let (success, message, entries_found) = match outcome {
            Ok(count) => (
                true,
                format!(
                    "Connected to {}; {} entries in {}",
                    endpoint, count, remote_root
                ),
                Some(count),
            ),
            Err(e) if e.is_timeout() => (
                false,
                format!("Connection to {} timed out: {}", endpoint, e),
                None,
            ),
            Err(e) => (false, format!("Connection test failed: {}", e), None),
        };

        if success {
            info!(entries = ?entries_found, "Connection test succeeded");
        } else {
            warn!(message = %message, "Connection test failed");
        }

        Ok(ConnectionTestReport {
            success,
            message,
            endpoint,
            remote_root,
            entries_found,
            tested_at,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "Disconnect failed");
        }
        self.event_bus
            .emit(CoreEvent::Connection(ConnectionEvent::Disconnected {
                endpoint: self.client.endpoint(),
            }))
            .ok();
    }

    fn emit(&self, event: SyncEvent) {
        self.event_bus.emit(CoreEvent::Sync(event)).ok();
    }
}
