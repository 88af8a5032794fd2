use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Not connected to remote endpoint")]
    NotConnected,

    #[error("Connection to {endpoint} failed: {message}")]
    ConnectionFailed { endpoint: String, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Remote entry not found: {0}")]
    NotFound(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Build a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        BridgeError::Timeout {
            operation: operation.into(),
            timeout_ms: after.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    /// The remote side reported that the entry does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }

    /// Whether repeating the same operation could plausibly succeed.
    ///
    /// Authentication failures, missing entries and unavailable capabilities
    /// are permanent for the lifetime of a sync pass.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            BridgeError::NotFound(_)
                | BridgeError::AuthenticationFailed(_)
                | BridgeError::NotAvailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
