//! Remote File Transfer Abstractions
//!
//! Provides the contract between the sync engine and the legacy file-transfer
//! endpoint that holds the canonical data files.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Kind of a remote directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteEntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// One entry of a remote directory listing.
///
/// `name` is reported exactly as the server sent it, which may contain
/// mis-decoded characters. It must be kept verbatim for fetch paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileEntry {
    pub name: String,
    pub kind: RemoteEntryKind,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteFileEntry {
    /// Convenience constructor for a regular file entry
    pub fn file(name: impl Into<String>, size: u64, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            kind: RemoteEntryKind::File,
            size,
            modified_at,
        }
    }

    /// Convenience constructor for a directory entry
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RemoteEntryKind::Directory,
            size: 0,
            modified_at: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == RemoteEntryKind::File
    }
}

/// Connection lifecycle of a transfer client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Transfer client trait
///
/// Owns at most one session with the remote file source. Implementations are
/// not required to support two concurrent sync passes on the same instance;
/// callers serialize access.
///
/// # Contract
///
/// - `connect` resolves only once the session is ready and is bounded by a
///   wall-clock timeout. A timed-out attempt leaves the client disconnected.
/// - `disconnect` is idempotent.
/// - `fetch` never leaves a partial local file behind on failure and fails
///   with a timeout when no data arrives within the stall window.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::transfer::TransferClient;
///
/// async fn mirror_one(client: &dyn TransferClient) -> Result<()> {
///     client.connect().await?;
///     for entry in client.list("/Artikel").await? {
///         if entry.is_file() {
///             let local = Path::new("data").join(&entry.name);
///             client.fetch(&format!("/Artikel/{}", entry.name), &local).await?;
///         }
///     }
///     client.disconnect().await
/// }
/// ```
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Establish the session
    async fn connect(&self) -> Result<()>;

    /// Close the session if one is open
    async fn disconnect(&self) -> Result<()>;

    /// Current connection state
    async fn state(&self) -> ConnectionState;

    /// Whether a ready session exists
    async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// List the entries of a remote directory (one level)
    async fn list(&self, remote_dir: &str) -> Result<Vec<RemoteFileEntry>>;

    /// Stream a remote file to `local_path`, returning the number of bytes written
    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<u64>;

    /// Human-readable endpoint description (e.g. `host:port`)
    fn endpoint(&self) -> String;
}

/// Join a remote directory and an entry name with exactly one separator
pub fn join_remote_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote_path() {
        assert_eq!(join_remote_path("/Artikel", "a.xml"), "/Artikel/a.xml");
        assert_eq!(join_remote_path("/Artikel/", "a.xml"), "/Artikel/a.xml");
        assert_eq!(join_remote_path("/", "Adressen"), "/Adressen");
        assert_eq!(join_remote_path("", "History"), "/History");
        assert_eq!(join_remote_path("data", "/x.XML"), "data/x.XML");
    }

    #[test]
    fn test_entry_constructors() {
        let file = RemoteFileEntry::file("10001.XML", 2048, None);
        assert!(file.is_file());
        assert_eq!(file.size, 2048);

        let dir = RemoteFileEntry::directory("archive");
        assert!(!dir.is_file());
        assert_eq!(dir.kind, RemoteEntryKind::Directory);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }
}
