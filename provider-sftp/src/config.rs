//! Connection settings for the SFTP adapter

use core_runtime::config::{CoreConfig, RemoteAuth, RemoteEndpointConfig};
use std::time::Duration;

/// Default read size per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Chunks buffered between the blocking reader and the async writer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

/// SFTP adapter configuration
#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: RemoteAuth,
    /// Bound for TCP connect + handshake + auth + channel open
    pub connect_timeout: Duration,
    /// Bound for the gap between two received chunks
    pub stall_timeout: Duration,
    pub chunk_size: usize,
    pub channel_capacity: usize,
}

impl SftpConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>, auth: RemoteAuth) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            auth,
            connect_timeout: Duration::from_secs(60),
            stall_timeout: Duration::from_secs(30),
            chunk_size: DEFAULT_CHUNK_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Adapter settings for a remote endpoint, with the default stall timeout
    pub fn from_endpoint(remote: &RemoteEndpointConfig) -> Self {
        Self::new(remote.host.clone(), remote.username.clone(), remote.auth.clone())
            .with_port(remote.port)
            .with_connect_timeout(remote.connect_timeout)
    }

    /// Adapter settings taken from the full core configuration
    pub fn from_core_config(config: &CoreConfig) -> Self {
        Self::from_endpoint(&config.remote).with_stall_timeout(config.sync.stall_timeout)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
