//! Error types for the SFTP provider

use bridge_traits::error::BridgeError;
use std::time::Duration;
use thiserror::Error;

/// libssh2 `LIBSSH2_FX_NO_SUCH_FILE`
const FX_NO_SUCH_FILE: i32 = 2;
/// libssh2 `LIBSSH2_FX_NO_SUCH_PATH`
const FX_NO_SUCH_PATH: i32 = 10;
/// libssh2 `LIBSSH2_ERROR_TIMEOUT`
const ERROR_TIMEOUT: i32 = -9;

/// SFTP provider errors
#[derive(Error, Debug)]
pub enum SftpError {
    /// TCP connection could not be established
    #[error("Failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    /// SSH protocol handshake failed
    #[error("SSH handshake with {endpoint} failed: {message}")]
    Handshake { endpoint: String, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// SFTP subsystem could not be opened
    #[error("Failed to open SFTP channel: {0}")]
    Channel(String),

    #[error("No such remote file: {0}")]
    NoSuchFile(String),

    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout { operation: String, after: Duration },

    /// Any other protocol-level failure
    #[error("SFTP {operation} failed: {message}")]
    Protocol { operation: String, message: String },

    #[error("Background task failed: {0}")]
    TaskJoin(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for SFTP operations
pub type Result<T> = std::result::Result<T, SftpError>;

impl SftpError {
    /// Classify an `ssh2` error raised while running `operation` on `target`.
    pub fn from_ssh(operation: &str, target: &str, error: ssh2::Error, after: Duration) -> Self {
        match error.code() {
            ssh2::ErrorCode::SFTP(FX_NO_SUCH_FILE) | ssh2::ErrorCode::SFTP(FX_NO_SUCH_PATH) => {
                SftpError::NoSuchFile(target.to_string())
            }
            ssh2::ErrorCode::Session(ERROR_TIMEOUT) => SftpError::Timeout {
                operation: operation.to_string(),
                after,
            },
            _ => SftpError::Protocol {
                operation: operation.to_string(),
                message: format!("{} ({})", error.message(), target),
            },
        }
    }
}

impl From<SftpError> for BridgeError {
    fn from(error: SftpError) -> Self {
        match error {
            SftpError::Connect { endpoint, message } => {
                BridgeError::ConnectionFailed { endpoint, message }
            }
            SftpError::Handshake { endpoint, message } => BridgeError::ConnectionFailed {
                endpoint,
                message: format!("handshake failed: {}", message),
            },
            SftpError::AuthenticationFailed(msg) => BridgeError::AuthenticationFailed(msg),
            SftpError::Channel(msg) => {
                BridgeError::OperationFailed(format!("SFTP channel: {}", msg))
            }
            SftpError::NoSuchFile(path) => BridgeError::NotFound(path),
            SftpError::Timeout { operation, after } => BridgeError::timeout(operation, after),
            SftpError::Protocol { operation, message } => {
                BridgeError::OperationFailed(format!("{}: {}", operation, message))
            }
            SftpError::TaskJoin(msg) => BridgeError::OperationFailed(msg),
            SftpError::Io(e) => BridgeError::Io(e),
        }
    }
}
