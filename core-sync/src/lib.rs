//! # Remote Mirror Sync
//!
//! Mirrors the remote data directories to local storage over an unreliable
//! transfer channel.
//!
//! ## Overview
//!
//! - Listing remote directories through a [`TransferClient`](bridge_traits::TransferClient)
//! - Deciding per file whether the local copy is current
//! - Fetching with bounded retries and backoff, reconnecting as needed
//! - Repairing mis-decoded remote filenames for local storage
//! - Reporting per-directory and per-pass statistics
//!
//! ## Components
//!
//! - **Filename Normalizer** (`normalizer`): Local storage keys and alternative remote names
//! - **Retry** (`retry`): Retry-with-backoff combinator shared by connect, list and fetch
//! - **Directory Sync Engine** (`engine`): Mirrors one flat remote directory
//! - **Sync Coordinator** (`coordinator`): Runs a full pass over the three directories
//! - **Statistics** (`stats`): `SyncStats`, `SyncResult`, `ConnectionTestReport`

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod normalizer;
pub mod retry;
pub mod stats;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use coordinator::SyncCoordinator;
pub use engine::DirectorySyncEngine;
pub use error::{Result, SyncError};
pub use normalizer::{alternative_remote_names, normalize_filename};
pub use retry::{retry_with_backoff, BackoffCurve, RetryError, RetryPolicy};
pub use stats::{
    ConnectionTestReport, FetchDecision, FetchReason, FileFailure, FileInfo, SyncResult,
    SyncStats, SyncTotals,
};
