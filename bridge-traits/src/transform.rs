//! External Transformation Contract
//!
//! The transformation program that converts mirrored raw files into the JSON
//! data model is opaque to the core. Only its exit status, captured output and
//! the summary file it may leave behind are part of the contract.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Captured result of one transform invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    /// Process exit code; `None` when terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl TransformOutput {
    /// Exit code 0 is the only success signal
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs the external transformation step.
///
/// Implementations must bound the invocation by a wall-clock ceiling and
/// return [`BridgeError::Timeout`](crate::error::BridgeError::Timeout) after
/// terminating the process. A non-zero exit is *not* an error at this level;
/// it is reported through [`TransformOutput::exit_code`].
#[async_trait]
pub trait TransformRunner: Send + Sync {
    async fn run(&self) -> Result<TransformOutput>;

    /// Short description of what is being run, for diagnostics
    fn describe(&self) -> String;
}
