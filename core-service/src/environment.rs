//! Pre-flight checks run before a full pipeline.
//!
//! Every check runs even when an earlier one fails so that all problems are
//! reported together in one [`CoreError::Environment`].

use crate::{CoreError, Result};
use core_sync::SyncCoordinator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const WRITE_PROBE: &str = ".write_probe";

pub struct EnvironmentCheck {
    data_root: PathBuf,
    program: String,
    working_dir: Option<PathBuf>,
    coordinator: Arc<SyncCoordinator>,
}

impl EnvironmentCheck {
    pub fn new(
        data_root: impl Into<PathBuf>,
        program: impl Into<String>,
        coordinator: Arc<SyncCoordinator>,
    ) -> Self {
        Self {
            data_root: data_root.into(),
            program: program.into(),
            working_dir: None,
            coordinator,
        }
    }

    /// Directory relative program paths are resolved against
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[instrument(skip(self), fields(data_root = %self.data_root.display()))]
    pub async fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if let Err(problem) = self.check_data_root().await {
            problems.push(problem);
        }

        if resolve_program(&self.program, self.working_dir.as_deref()).is_none() {
            problems.push(format!(
                "Transform program '{}' not found",
                self.program
            ));
        }

        match self.coordinator.test_connection().await {
            Ok(report) if report.success => {
                debug!(endpoint = %report.endpoint, "Remote reachable");
            }
            Ok(report) => problems.push(report.message),
            Err(e) => problems.push(e.to_string()),
        }

        if problems.is_empty() {
            info!("Environment check passed");
            Ok(())
        } else {
            warn!(problems = ?problems, "Environment check failed");
            Err(CoreError::Environment(problems))
        }
    }

    async fn check_data_root(&self) -> std::result::Result<(), String> {
        tokio::fs::create_dir_all(&self.data_root)
            .await
            .map_err(|e| {
                format!(
                    "Data root {} cannot be created: {}",
                    self.data_root.display(),
                    e
                )
            })?;

        let probe = self.data_root.join(WRITE_PROBE);
        tokio::fs::write(&probe, b"ok").await.map_err(|e| {
            format!(
                "Data root {} is not writable: {}",
                self.data_root.display(),
                e
            )
        })?;
        if let Err(e) = tokio::fs::remove_file(&probe).await {
            debug!(error = %e, "Failed to remove write probe");
        }
        Ok(())
    }
}

/// Resolve a program the way a shell would: paths are checked directly,
/// bare names are looked up on `PATH`.
pub fn resolve_program(program: &str, working_dir: Option<&Path>) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let path = match working_dir {
            Some(dir) if candidate.is_relative() => dir.join(candidate),
            _ => candidate.to_path_buf(),
        };
        return path.is_file().then_some(path);
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        executable_names(program)
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    })
}

#[cfg(windows)]
fn executable_names(program: &str) -> Vec<String> {
    vec![program.to_string(), format!("{}.exe", program)]
}

#[cfg(not(windows))]
fn executable_names(program: &str) -> Vec<String> {
    vec![program.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("convert.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        assert_eq!(
            resolve_program(script.to_str().unwrap(), None),
            Some(script.clone())
        );
        assert!(resolve_program(dir.path().join("missing.sh").to_str().unwrap(), None).is_none());
    }

    #[test]
    fn test_resolves_relative_to_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/convert"), "").unwrap();

        assert_eq!(
            resolve_program("bin/convert", Some(dir.path())),
            Some(dir.path().join("bin/convert"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolves_bare_name_on_path() {
        assert!(resolve_program("sh", None).is_some());
        assert!(resolve_program("definitely-not-a-real-program-7f3a", None).is_none());
    }
}
