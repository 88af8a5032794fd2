//! Umbrella crate for the data mirror workspace.
//!
//! Hosts depend on this crate and pick a feature instead of wiring each
//! member crate themselves:
//!
//! - `desktop-shims` (default): the full service with the SFTP client and the
//!   process transform runner, re-exported as [`service`]
//! - `sync-only`: just the sync engine, re-exported as [`sync`]

#[cfg(feature = "desktop-shims")]
pub use core_service as service;

#[cfg(feature = "sync-only")]
pub use core_sync as sync;
