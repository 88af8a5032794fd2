//! Subprocess-backed transform runner

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    transform::{TransformOutput, TransformRunner},
};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Runs an external program and reports its exit status and output.
///
/// The child is spawned with `kill_on_drop`, so when the timeout elapses the
/// pending wait future is dropped and the process is killed with it.
#[derive(Debug, Clone)]
pub struct ProcessTransformRunner {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl ProcessTransformRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable for the child process
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }

        command
    }
}

#[async_trait]
impl TransformRunner for ProcessTransformRunner {
    #[instrument(skip(self), fields(program = %self.program))]
    async fn run(&self) -> Result<TransformOutput> {
        let started = Instant::now();

        let child = self.command().spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BridgeError::NotAvailable(format!("transform program not found: {}", self.program))
            } else {
                BridgeError::OperationFailed(format!(
                    "failed to start {}: {}",
                    self.program, e
                ))
            }
        })?;

        debug!(pid = child.id(), "Transform process started");

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Transform exceeded its time limit and was killed"
                );
                return Err(BridgeError::timeout("transform", self.timeout));
            }
        };

        let result = TransformOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        };

        info!(
            exit_code = ?result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "Transform process finished"
        );

        Ok(result)
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}
