//! # Host Bridge Traits
//!
//! Capability traits the sync core depends on but does not implement itself.
//!
//! ## Overview
//!
//! The core never talks to a network socket or spawns a process directly. It
//! holds trait objects for each external capability, and concrete adapters
//! live in their own crates:
//!
//! | Capability | Trait | Adapter crate |
//! |------------|-------|---------------|
//! | Remote file source | [`TransferClient`](transfer::TransferClient) | `provider-sftp` |
//! | Transformation step | [`TransformRunner`](transform::TransformRunner) | `bridge-desktop` |
//! | Time source | [`Clock`](time::Clock) | built in ([`SystemClock`]) |
//! | Log forwarding | [`LoggerSink`](time::LoggerSink) | built in ([`ConsoleLogger`]) |
//!
//! ## Error Handling
//!
//! All traits use [`BridgeError`](error::BridgeError). Adapters should:
//!
//! - Convert library-specific errors to `BridgeError`
//! - Map "no such file" conditions to [`BridgeError::NotFound`]
//! - Report elapsed deadlines as [`BridgeError::Timeout`]
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` so that adapters can be shared across
//! tokio tasks behind an `Arc`.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::transfer::{ConnectionState, RemoteFileEntry, TransferClient};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyClient { /* ... */ }
//!
//! #[async_trait]
//! impl TransferClient for MyClient {
//!     async fn connect(&self) -> Result<()> { todo!() }
//!     async fn disconnect(&self) -> Result<()> { todo!() }
//!     async fn state(&self) -> ConnectionState { todo!() }
//!     async fn list(&self, dir: &str) -> Result<Vec<RemoteFileEntry>> { todo!() }
//!     async fn fetch(&self, remote: &str, local: &std::path::Path) -> Result<u64> { todo!() }
//!     fn endpoint(&self) -> String { "example:22".into() }
//! }
//! ```

pub mod error;
pub mod time;
pub mod transfer;
pub mod transform;

pub use error::BridgeError;

// Re-export commonly used types
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
pub use transfer::{
    join_remote_path, ConnectionState, RemoteEntryKind, RemoteFileEntry, TransferClient,
};
pub use transform::{TransformOutput, TransformRunner};
