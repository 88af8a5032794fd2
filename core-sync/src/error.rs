use bridge_traits::error::BridgeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync already in progress on {endpoint}")]
    SyncInProgress { endpoint: String },

    #[error("Connection to {endpoint} failed after {attempts} attempts: {source}")]
    Connection {
        endpoint: String,
        attempts: u32,
        #[source]
        source: BridgeError,
    },

    #[error("Failed to list remote directory {directory} after {attempts} attempts: {source}")]
    Listing {
        directory: String,
        attempts: u32,
        #[source]
        source: BridgeError,
    },

    #[error("Local filesystem error at {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer error: {0}")]
    Bridge(#[from] BridgeError),
}

impl SyncError {
    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure came from a timeout anywhere in the chain
    pub fn is_timeout(&self) -> bool {
        match self {
            SyncError::Connection { source, .. }
            | SyncError::Listing { source, .. }
            | SyncError::Bridge(source) => source.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
