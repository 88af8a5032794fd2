//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for server and desktop hosts
//! (Linux, macOS, Windows).
//!
//! ## Overview
//!
//! - [`ProcessTransformRunner`] runs the external transformation program as a
//!   child process using `tokio::process`, capturing its output and killing it
//!   when the wall-clock ceiling elapses.
//! - [`ConsoleLogger`] is the console log sink hosts pass to
//!   `core_runtime::logging` when they have no logger of their own.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::ProcessTransformRunner;
//! use bridge_traits::transform::TransformRunner;
//! use std::time::Duration;
//!
//! let runner = ProcessTransformRunner::new("python3")
//!     .with_args(["convert.py"])
//!     .with_working_dir("/srv")
//!     .with_timeout(Duration::from_secs(300));
//!
//! let output = runner.run().await?;
//! if !output.succeeded() {
//!     eprintln!("{}", output.stderr);
//! }
//! ```

mod process;

pub use bridge_traits::time::ConsoleLogger;
pub use process::ProcessTransformRunner;
