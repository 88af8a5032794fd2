//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the sync engine crates:
//! - Configuration object, builder and validation
//! - Logging and tracing initialisation
//! - Diagnostic event bus
//!
//! ## Overview
//!
//! Every other core crate receives a [`CoreConfig`](config::CoreConfig) and an
//! [`EventBus`](events::EventBus) from here instead of reading globals.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
