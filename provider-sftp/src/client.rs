//! SFTP transfer client implementation
//!
//! Implements the `TransferClient` trait over SSH/SFTP using `ssh2`.
//!
//! `ssh2` is a blocking library, so every call that touches the session runs
//! on `tokio::task::spawn_blocking`. Downloads stream chunks from the blocking
//! reader to an async file writer through a bounded channel; the writer waits
//! at most `stall_timeout` for each chunk.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::transfer::{
    join_remote_path, ConnectionState, RemoteEntryKind, RemoteFileEntry, TransferClient,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_runtime::config::RemoteAuth;
use secrecy::ExposeSecret;
use ssh2::{Session, Sftp};
use std::collections::HashMap;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::SftpConfig;
use crate::error::SftpError;

/// Suffix of the temporary file a download is written to before it is
/// moved into place.
const PARTIAL_SUFFIX: &str = ".partial";

const BLOCKING_GRACE: Duration = Duration::from_millis(500);

/// A ready SSH session with an open SFTP channel
struct SftpSession {
    session: Session,
    sftp: Sftp,
}

/// Connection state of the adapter. Every operation inspects and
/// transitions it explicitly.
enum SessionState {
    Disconnected,
    Connecting,
    Connected(Arc<SftpSession>),
}

impl SessionState {
    fn as_connection_state(&self) -> ConnectionState {
        match self {
            SessionState::Disconnected => ConnectionState::Disconnected,
            SessionState::Connecting => ConnectionState::Connecting,
            SessionState::Connected(_) => ConnectionState::Connected,
        }
    }
}

/// SSH/SFTP transfer client
///
/// Holds at most one session. Callers serialize sync passes; the internal
/// locks only protect the state tag and are never held across an `.await`.
///
/// # Example
///
/// ```ignore
/// use provider_sftp::{SftpConfig, SftpTransferClient};
/// use bridge_traits::transfer::TransferClient;
///
/// let client = SftpTransferClient::new(SftpConfig::from_core_config(&config));
/// client.connect().await?;
/// let entries = client.list("/Artikel").await?;
/// client.disconnect().await?;
/// ```
pub struct SftpTransferClient {
    config: SftpConfig,
    state: Mutex<SessionState>,
    /// Remote path as listed → path exactly as the server returned it.
    /// Keeps non-UTF-8 names fetchable after lossy conversion to `String`.
    listed_paths: Mutex<HashMap<String, PathBuf>>,
}

impl SftpTransferClient {
    pub fn new(config: SftpConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SessionState::Disconnected),
            listed_paths: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SftpConfig {
        &self.config
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: SessionState) {
        *self.lock_state() = next;
    }

    fn current_session(&self) -> Result<Arc<SftpSession>> {
        match &*self.lock_state() {
            SessionState::Connected(session) => Ok(Arc::clone(session)),
            _ => Err(BridgeError::NotConnected),
        }
    }

    fn resolve_remote_path(&self, remote_path: &str) -> PathBuf {
        self.listed_paths
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(remote_path)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(remote_path))
    }

    fn remember_listed_paths(&self, paths: impl IntoIterator<Item = (String, PathBuf)>) {
        let mut listed = self
            .listed_paths
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listed.extend(paths);
    }
}

// ============================================================================
// Blocking helpers
// ============================================================================

fn connect_blocking(config: &SftpConfig) -> std::result::Result<SftpSession, SftpError> {
    let endpoint = config.endpoint();
    let timeout = config.connect_timeout;
    // Socket-level deadlines sit slightly past the async deadline so that the
    // caller's timer decides the outcome.
    let socket_timeout = timeout + BLOCKING_GRACE;

    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| SftpError::Connect {
            endpoint: endpoint.clone(),
            message: format!("address resolution failed: {}", e),
        })?
        .next()
        .ok_or_else(|| SftpError::Connect {
            endpoint: endpoint.clone(),
            message: "host resolved to no addresses".to_string(),
        })?;

    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
        if e.kind() == std::io::ErrorKind::TimedOut {
            SftpError::Timeout {
                operation: "connect".to_string(),
                after: timeout,
            }
        } else {
            SftpError::Connect {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            }
        }
    })?;
    tcp.set_read_timeout(Some(socket_timeout)).ok();
    tcp.set_write_timeout(Some(socket_timeout)).ok();

    let mut session = Session::new().map_err(|e| SftpError::Handshake {
        endpoint: endpoint.clone(),
        message: format!("failed to create session: {}", e),
    })?;
    session.set_tcp_stream(tcp);
    session.set_timeout(duration_to_millis_u32(socket_timeout));

    session.handshake().map_err(|e| match e.code() {
        ssh2::ErrorCode::Session(-9) => SftpError::Timeout {
            operation: "connect".to_string(),
            after: timeout,
        },
        _ => SftpError::Handshake {
            endpoint: endpoint.clone(),
            message: e.message().to_string(),
        },
    })?;

    authenticate(&session, config)?;

    if !session.authenticated() {
        return Err(SftpError::AuthenticationFailed(
            "server did not accept the credentials".to_string(),
        ));
    }

    let sftp = session
        .sftp()
        .map_err(|e| SftpError::Channel(e.message().to_string()))?;

    // Reads after connect are bounded by the stall window, not the connect window.
    session.set_timeout(duration_to_millis_u32(config.stall_timeout + BLOCKING_GRACE));

    Ok(SftpSession { session, sftp })
}

fn authenticate(session: &Session, config: &SftpConfig) -> std::result::Result<(), SftpError> {
    match &config.auth {
        RemoteAuth::Password(password) => session
            .userauth_password(&config.username, password.expose_secret())
            .map_err(|e| {
                SftpError::AuthenticationFailed(format!("password rejected: {}", e.message()))
            }),
        RemoteAuth::KeyFile { path, passphrase } => {
            let pass: Option<&str> = passphrase.as_ref().map(|p| p.expose_secret());
            session
                .userauth_pubkey_file(&config.username, None, path, pass)
                .map_err(|e| {
                    SftpError::AuthenticationFailed(format!("key file rejected: {}", e.message()))
                })
        }
        RemoteAuth::Agent => {
            let mut agent = session.agent().map_err(|e| {
                SftpError::AuthenticationFailed(format!("SSH agent unavailable: {}", e.message()))
            })?;
            agent.connect().map_err(|e| {
                SftpError::AuthenticationFailed(format!("SSH agent unavailable: {}", e.message()))
            })?;
            agent.list_identities().map_err(|e| {
                SftpError::AuthenticationFailed(format!("SSH agent listing failed: {}", e.message()))
            })?;
            let identities = agent.identities().map_err(|e| {
                SftpError::AuthenticationFailed(format!("SSH agent listing failed: {}", e.message()))
            })?;

            if identities
                .iter()
                .any(|identity| agent.userauth(&config.username, identity).is_ok())
            {
                Ok(())
            } else {
                Err(SftpError::AuthenticationFailed(
                    "no SSH agent identity was accepted".to_string(),
                ))
            }
        }
    }
}

fn list_blocking(
    sftp: &Sftp,
    remote_dir: &str,
    stall_timeout: Duration,
) -> std::result::Result<Vec<(RemoteFileEntry, PathBuf)>, SftpError> {
    let listing = sftp
        .readdir(Path::new(remote_dir))
        .map_err(|e| SftpError::from_ssh("list", remote_dir, e, stall_timeout))?;

    Ok(listing
        .into_iter()
        .filter_map(|(path, stat)| {
            let name = path.file_name()?.to_string_lossy().into_owned();
            if name == "." || name == ".." {
                return None;
            }
            let file_type = stat.file_type();
            let kind = if file_type.is_file() {
                RemoteEntryKind::File
            } else if file_type.is_dir() {
                RemoteEntryKind::Directory
            } else if file_type.is_symlink() {
                RemoteEntryKind::Symlink
            } else {
                RemoteEntryKind::Other
            };
            let modified_at = stat
                .mtime
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));
            let entry = RemoteFileEntry {
                name,
                kind,
                size: stat.size.unwrap_or(0),
                modified_at,
            };
            Some((entry, path))
        })
        .collect())
}

/// Reads `remote` chunk by chunk and forwards each chunk to `tx`.
///
/// Returns as soon as the receiver is gone, which is how the async side
/// tears the stream down after a stall or a write error.
fn stream_blocking(
    session: &SftpSession,
    remote: &Path,
    chunk_size: usize,
    stall_timeout: Duration,
    tx: mpsc::Sender<std::result::Result<Bytes, SftpError>>,
) {
    let display = remote.to_string_lossy().into_owned();
    let mut file = match session.sftp.open(remote) {
        Ok(file) => file,
        Err(e) => {
            let _ = tx.blocking_send(Err(SftpError::from_ssh(
                "fetch",
                &display,
                e,
                stall_timeout,
            )));
            return;
        }
    };

    let mut buf = vec![0u8; chunk_size];
    loop {
        match file.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                if tx
                    .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                    .is_err()
                {
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let error = if e.kind() == std::io::ErrorKind::TimedOut {
                    SftpError::Timeout {
                        operation: format!("fetch {}", display),
                        after: stall_timeout,
                    }
                } else {
                    SftpError::Io(e)
                };
                let _ = tx.blocking_send(Err(error));
                return;
            }
        }
    }
}

fn duration_to_millis_u32(duration: Duration) -> u32 {
    duration.as_millis().min(u32::MAX as u128) as u32
}

fn partial_path(local_path: &Path) -> PathBuf {
    let mut name = local_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    local_path.with_file_name(name)
}

async fn join_blocking<T>(handle: tokio::task::JoinHandle<T>) -> std::result::Result<T, SftpError> {
    handle
        .await
        .map_err(|e| SftpError::TaskJoin(format!("blocking task failed: {}", e)))
}

/// Puts a `Connecting` state back to `Disconnected` when the connect future
/// is dropped before it settles.
struct ConnectingReset<'a>(&'a Mutex<SessionState>);

impl Drop for ConnectingReset<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(*state, SessionState::Connecting) {
            *state = SessionState::Disconnected;
        }
    }
}

/// Drain `rx` into `local_path` through a `.partial` file.
///
/// Waits at most `stall` for each chunk. On any failure, including the final
/// rename, the partial file is removed and `local_path` is left untouched.
/// Dropping `rx` on return stops the blocking reader at its next send.
async fn write_stream(
    mut rx: mpsc::Receiver<std::result::Result<Bytes, SftpError>>,
    local_path: &Path,
    stall: Duration,
    remote_path: &str,
) -> Result<u64> {
    let temp_path = partial_path(local_path);
    let written: Result<u64> = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        let mut total = 0u64;
        loop {
            match tokio::time::timeout(stall, rx.recv()).await {
                Err(_) => {
                    return Err(BridgeError::timeout(
                        format!("fetch {} (no data received)", remote_path),
                        stall,
                    ))
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(chunk))) => {
                    file.write_all(&chunk).await?;
                    total += chunk.len() as u64;
                }
            }
        }
        file.flush().await?;
        file.sync_all().await.ok();
        drop(file);
        tokio::fs::rename(&temp_path, local_path).await?;
        Ok(total)
    }
    .await;
    drop(rx);

    match written {
        Ok(total) => {
            debug!(bytes = total, "Fetched remote file");
            Ok(total)
        }
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&temp_path).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %remove_err, "Failed to remove partial download");
                }
            }
            warn!(error = %e, "Fetch failed, partial file removed");
            Err(e)
        }
    }
}

// ============================================================================
// TransferClient
// ============================================================================

#[async_trait]
impl TransferClient for SftpTransferClient {
    #[instrument(skip(self), fields(endpoint = %self.config.endpoint()))]
    async fn connect(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            match &*state {
                SessionState::Connected(_) => {
                    debug!("Already connected");
                    return Ok(());
                }
                SessionState::Connecting => {
                    return Err(BridgeError::OperationFailed(
                        "a connection attempt is already in progress".to_string(),
                    ));
                }
                SessionState::Disconnected => *state = SessionState::Connecting,
            }
        }
        let _reset = ConnectingReset(&self.state);

        let started = Instant::now();
        let timeout = self.config.connect_timeout;
        let config = self.config.clone();
        let handle = tokio::task::spawn_blocking(move || connect_blocking(&config));

        let outcome = match tokio::time::timeout(timeout, handle).await {
            Err(_) => Err(SftpError::Timeout {
                operation: "connect".to_string(),
                after: timeout,
            }),
            Ok(joined) => joined
                .map_err(|e| SftpError::TaskJoin(format!("connect task failed: {}", e)))
                .and_then(|result| result),
        };

        match outcome {
            Ok(session) => {
                self.set_state(SessionState::Connected(Arc::new(session)));
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    auth = self.config.auth.mode(),
                    "SFTP session ready"
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                warn!(error = %e, "SFTP connect failed");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self), fields(endpoint = %self.config.endpoint()))]
    async fn disconnect(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lock_state(), SessionState::Disconnected);

        if let SessionState::Connected(session) = previous {
            let closed = tokio::task::spawn_blocking(move || {
                session
                    .session
                    .disconnect(None, "sync pass finished", None)
                    .ok();
            });
            if let Err(e) = closed.await {
                debug!(error = %e, "Disconnect task did not complete cleanly");
            }
            info!("SFTP session closed");
        } else {
            debug!("Disconnect requested while not connected");
        }

        Ok(())
    }

    async fn state(&self) -> ConnectionState {
        self.lock_state().as_connection_state()
    }

    #[instrument(skip(self))]
    async fn list(&self, remote_dir: &str) -> Result<Vec<RemoteFileEntry>> {
        let session = self.current_session()?;
        let dir = remote_dir.to_string();
        let stall = self.config.stall_timeout;

        let listed = join_blocking(tokio::task::spawn_blocking(move || {
            list_blocking(&session.sftp, &dir, stall)
        }))
        .await??;

        self.remember_listed_paths(
            listed
                .iter()
                .map(|(entry, path)| (join_remote_path(remote_dir, &entry.name), path.clone())),
        );

        let entries: Vec<RemoteFileEntry> = listed.into_iter().map(|(entry, _)| entry).collect();
        debug!(entries = entries.len(), "Listed remote directory");
        Ok(entries)
    }

    #[instrument(skip(self, local_path), fields(local = %local_path.display()))]
    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        let session = self.current_session()?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let remote = self.resolve_remote_path(remote_path);
        let stall = self.config.stall_timeout;
        let chunk_size = self.config.chunk_size;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let reader = tokio::task::spawn_blocking(move || {
            stream_blocking(&session, &remote, chunk_size, stall, tx)
        });

        let written = write_stream(rx, local_path, stall, remote_path).await;
        if written.is_ok() {
            if let Err(e) = reader.await {
                debug!(error = %e, "Reader task ended abnormally after completion");
            }
        }
        written
    }

    fn endpoint(&self) -> String {
        self.config.endpoint()
    }
}
