//! # SFTP Provider
//!
//! Implements the `TransferClient` trait for the legacy remote file source
//! over SSH/SFTP.
//!
//! ## Overview
//!
//! This crate provides:
//! - Password, key-file and SSH-agent authentication
//! - An explicit connection state machine (`Disconnected`, `Connecting`, `Connected`)
//! - A wall-clock bound on session establishment
//! - Streaming downloads with a per-chunk stall timeout that never leave a
//!   partial file behind
//! - Mapping of `ssh2` failures onto `BridgeError` (missing files become
//!   `NotFound`, expired deadlines become `Timeout`)

pub mod client;
pub mod config;
pub mod error;

pub use client::SftpTransferClient;
pub use config::SftpConfig;
pub use error::{Result, SftpError};
