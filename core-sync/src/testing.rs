//! In-memory transfer client for tests
//!
//! [`MemoryTransferClient`] serves a scripted remote tree from memory and
//! writes fetched bytes to the real local filesystem, so engine and
//! coordinator behaviour can be exercised without a network.
//!
//! ```ignore
//! use core_sync::testing::{MemoryTransferClient, ScriptedFailure};
//!
//! let remote = MemoryTransferClient::new();
//! remote.add_file("/Artikel", "4711.XML", b"<Artikel/>", None);
//! remote.fail_fetches("/Artikel/4711.XML", 2, ScriptedFailure::Timeout);
//! ```

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    transfer::{join_remote_path, ConnectionState, RemoteFileEntry, TransferClient},
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Failure injected into a scripted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    Timeout,
    Refused,
    NotFound,
    Denied,
    Broken,
}

impl ScriptedFailure {
    fn into_error(self, operation: &str, target: &str) -> BridgeError {
        match self {
            ScriptedFailure::Timeout => BridgeError::timeout(operation, Duration::from_secs(60)),
            ScriptedFailure::Refused => BridgeError::ConnectionFailed {
                endpoint: target.to_string(),
                message: "connection refused".to_string(),
            },
            ScriptedFailure::NotFound => BridgeError::NotFound(target.to_string()),
            ScriptedFailure::Denied => BridgeError::AuthenticationFailed(format!(
                "{} rejected for {}",
                operation, target
            )),
            ScriptedFailure::Broken => {
                BridgeError::OperationFailed(format!("{} of {} failed", operation, target))
            }
        }
    }
}

/// Remaining scripted failures; `u32::MAX` never runs out
#[derive(Debug, Clone, Copy)]
struct Script {
    remaining: u32,
    failure: ScriptedFailure,
}

impl Script {
    fn next(&mut self) -> Option<ScriptedFailure> {
        if self.remaining == 0 {
            return None;
        }
        if self.remaining != u32::MAX {
            self.remaining -= 1;
        }
        Some(self.failure)
    }

    fn take(scripts: &mut HashMap<String, Script>, key: &str) -> Option<ScriptedFailure> {
        scripts.get_mut(key).and_then(Script::next)
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    contents: Vec<u8>,
    modified_at: Option<DateTime<Utc>>,
    /// Name reported by `list` when it differs from the fetchable name
    listed_as: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    state: ConnectionState,
    files: BTreeMap<String, BTreeMap<String, MemoryFile>>,
    subdirectories: BTreeMap<String, Vec<String>>,
    connect_failures: Option<Script>,
    list_failures: HashMap<String, Script>,
    fetch_failures: HashMap<String, Script>,
    connects: u32,
    disconnects: u32,
    fetches: Vec<String>,
    lists: Vec<String>,
    drop_on_next_fetch: bool,
}

/// Scripted in-memory remote file source
#[derive(Debug)]
pub struct MemoryTransferClient {
    endpoint: String,
    latency: Mutex<Duration>,
    inner: Mutex<MemoryState>,
}

impl Default for MemoryTransferClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransferClient {
    pub fn new() -> Self {
        Self::with_endpoint("memory.test:22")
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            latency: Mutex::new(Duration::ZERO),
            inner: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dir_key(dir: &str) -> String {
        let trimmed = dir.trim_end_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    fn split_path(path: &str) -> (String, String) {
        match path.rsplit_once('/') {
            Some((dir, name)) => (Self::dir_key(dir), name.to_string()),
            None => ("/".to_string(), path.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Remote tree
    // ------------------------------------------------------------------

    /// Add or replace a remote file
    pub fn add_file(
        &self,
        dir: &str,
        name: &str,
        contents: &[u8],
        modified_at: Option<DateTime<Utc>>,
    ) {
        self.insert(dir, name, contents, modified_at, None);
    }

    /// Add a file that `list` reports as `listed_as` but that can only be
    /// fetched under `name`
    pub fn add_file_listed_as(&self, dir: &str, name: &str, listed_as: &str, contents: &[u8]) {
        self.insert(dir, name, contents, None, Some(listed_as.to_string()));
    }

    fn insert(
        &self,
        dir: &str,
        name: &str,
        contents: &[u8],
        modified_at: Option<DateTime<Utc>>,
        listed_as: Option<String>,
    ) {
        self.lock()
            .files
            .entry(Self::dir_key(dir))
            .or_default()
            .insert(
                name.to_string(),
                MemoryFile {
                    contents: contents.to_vec(),
                    modified_at,
                    listed_as,
                },
            );
    }

    /// Create an empty remote directory
    pub fn add_directory(&self, dir: &str) {
        self.lock().files.entry(Self::dir_key(dir)).or_default();
    }

    /// Add a subdirectory entry to a listing
    pub fn add_subdirectory(&self, dir: &str, name: &str) {
        let mut inner = self.lock();
        inner.files.entry(Self::dir_key(dir)).or_default();
        inner
            .subdirectories
            .entry(Self::dir_key(dir))
            .or_default()
            .push(name.to_string());
    }

    pub fn remove_file(&self, dir: &str, name: &str) {
        if let Some(files) = self.lock().files.get_mut(&Self::dir_key(dir)) {
            files.remove(name);
        }
    }

    // ------------------------------------------------------------------
    // Failure scripts
    // ------------------------------------------------------------------

    /// Make the next `count` connects fail
    pub fn fail_connects(&self, count: u32, failure: ScriptedFailure) {
        self.lock().connect_failures = Some(Script {
            remaining: count,
            failure,
        });
    }

    /// Make the next `count` listings of `dir` fail
    pub fn fail_lists(&self, dir: &str, count: u32, failure: ScriptedFailure) {
        self.lock().list_failures.insert(
            Self::dir_key(dir),
            Script {
                remaining: count,
                failure,
            },
        );
    }

    /// Make the next `count` fetches of `remote_path` fail
    pub fn fail_fetches(&self, remote_path: &str, count: u32, failure: ScriptedFailure) {
        self.lock().fetch_failures.insert(
            remote_path.to_string(),
            Script {
                remaining: count,
                failure,
            },
        );
    }

    /// Make every fetch of `remote_path` fail
    pub fn always_fail_fetch(&self, remote_path: &str, failure: ScriptedFailure) {
        self.fail_fetches(remote_path, u32::MAX, failure);
    }

    /// Delay applied to every connect, list and fetch
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|p| p.into_inner()) = latency;
    }

    /// Simulate the server dropping the session
    pub fn drop_connection(&self) {
        self.lock().state = ConnectionState::Disconnected;
    }

    /// Drop the session in the middle of the next fetch
    pub fn drop_connection_on_next_fetch(&self) {
        self.lock().drop_on_next_fetch = true;
    }

    // ------------------------------------------------------------------
    // Observations
    // ------------------------------------------------------------------

    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    pub fn disconnect_count(&self) -> u32 {
        self.lock().disconnects
    }

    /// Every fetch attempt, in order
    pub fn fetches(&self) -> Vec<String> {
        self.lock().fetches.clone()
    }

    pub fn fetch_count(&self, remote_path: &str) -> usize {
        self.lock()
            .fetches
            .iter()
            .filter(|p| p.as_str() == remote_path)
            .count()
    }

    /// Every list attempt, in order
    pub fn lists(&self) -> Vec<String> {
        self.lock().lists.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.lock().state
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap_or_else(|p| p.into_inner());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl TransferClient for MemoryTransferClient {
    async fn connect(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.state == ConnectionState::Connected {
                return Ok(());
            }
            inner.connects += 1;
            inner.state = ConnectionState::Connecting;
        }

        self.simulate_latency().await;

        let mut inner = self.lock();
        let failure = inner.connect_failures.as_mut().and_then(Script::next);

        match failure {
            Some(failure) => {
                inner.state = ConnectionState::Disconnected;
                Err(failure.into_error("connect", &self.endpoint))
            }
            None => {
                inner.state = ConnectionState::Connected;
                Ok(())
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Disconnected {
            inner.disconnects += 1;
        }
        inner.state = ConnectionState::Disconnected;
        Ok(())
    }

    async fn state(&self) -> ConnectionState {
        self.lock().state
    }

    async fn list(&self, remote_dir: &str) -> Result<Vec<RemoteFileEntry>> {
        self.simulate_latency().await;

        let key = Self::dir_key(remote_dir);
        let mut inner = self.lock();
        inner.lists.push(key.clone());

        if inner.state != ConnectionState::Connected {
            return Err(BridgeError::NotConnected);
        }
        if let Some(failure) = Script::take(&mut inner.list_failures, &key) {
            return Err(failure.into_error("list", &key));
        }

        let child_dirs: Vec<String> = inner
            .files
            .keys()
            .filter_map(|dir| {
                let (parent, name) = Self::split_path(dir);
                (parent == key && !name.is_empty()).then_some(name)
            })
            .chain(inner.subdirectories.get(&key).into_iter().flatten().cloned())
            .collect();

        let files = match inner.files.get(&key) {
            Some(files) => files,
            None if !child_dirs.is_empty() => {
                return Ok(child_dirs
                    .into_iter()
                    .map(RemoteFileEntry::directory)
                    .collect())
            }
            None => return Err(BridgeError::NotFound(key)),
        };

        let mut entries: Vec<RemoteFileEntry> = files
            .iter()
            .map(|(name, file)| {
                RemoteFileEntry::file(
                    file.listed_as.clone().unwrap_or_else(|| name.clone()),
                    file.contents.len() as u64,
                    file.modified_at,
                )
            })
            .collect();
        entries.extend(child_dirs.into_iter().map(RemoteFileEntry::directory));

        Ok(entries)
    }

    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        self.simulate_latency().await;

        let contents = {
            let mut inner = self.lock();
            inner.fetches.push(remote_path.to_string());

            if inner.state != ConnectionState::Connected {
                return Err(BridgeError::NotConnected);
            }
            if std::mem::take(&mut inner.drop_on_next_fetch) {
                inner.state = ConnectionState::Disconnected;
                return Err(BridgeError::NotConnected);
            }
            if let Some(failure) = Script::take(&mut inner.fetch_failures, remote_path) {
                return Err(failure.into_error("fetch", remote_path));
            }

            let (dir, name) = Self::split_path(remote_path);
            inner
                .files
                .get(&dir)
                .and_then(|files| files.get(&name))
                .map(|file| file.contents.clone())
                .ok_or_else(|| BridgeError::NotFound(join_remote_path(&dir, &name)))?
        };

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &contents).await?;

        Ok(contents.len() as u64)
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}
