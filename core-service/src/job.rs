//! # Job Model
//!
//! Jobs sequence the pipeline steps and record what happened to each of them.
//!
//! ## State Machine
//!
//! ```text
//! Running → Completed
//!    ↓
//!  Failed
//! ```
//!
//! Completed and failed jobs are terminal. Any other transition is rejected
//! with [`CoreError::InvalidStateTransition`]. Steps are append-only: a new
//! step can only begin once the previous one has finished.

use crate::transform::TransformResult;
use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use core_sync::SyncResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Job Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FullPipeline,
    SyncOnly,
    TransformOnly,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FullPipeline => "full_pipeline",
            JobType::SyncOnly => "sync_only",
            JobType::TransformOnly => "transform_only",
        }
    }

    /// Steps run by this job type, in order
    pub fn steps(&self) -> &'static [JobStepKind] {
        match self {
            JobType::FullPipeline => &[
                JobStepKind::ValidateEnvironment,
                JobStepKind::SyncData,
                JobStepKind::TransformData,
            ],
            JobType::SyncOnly => &[JobStepKind::SyncData],
            JobType::TransformOnly => &[JobStepKind::TransformData],
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStepKind {
    ValidateEnvironment,
    SyncData,
    TransformData,
}

impl JobStepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStepKind::ValidateEnvironment => "validate_environment",
            JobStepKind::SyncData => "sync_data",
            JobStepKind::TransformData => "transform_data",
        }
    }
}

impl fmt::Display for JobStepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status shared by jobs and steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job Id
// ============================================================================

/// Time-derived job identifier: `job-<yyyymmddTHHMMSS>-<8 hex>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "job-{}-{}",
            now.format("%Y%m%dT%H%M%S"),
            &suffix[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

// ============================================================================
// Steps and Status
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStep {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobState,
    pub error: Option<String>,
}

impl JobStep {
    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    pub step: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: JobId,
    pub job_type: JobType,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub status: JobState,
    pub steps: Vec<JobStep>,
    pub error: Option<JobError>,
    pub sync_result: Option<SyncResult>,
    pub transform_result: Option<TransformResult>,
}

impl JobStatus {
    /// A new running job
    pub fn new(job_type: JobType, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::generate(now),
            job_type,
            started_at: now,
            finished_at: None,
            duration_ms: None,
            status: JobState::Running,
            steps: Vec::new(),
            error: None,
            sync_result: None,
            transform_result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn current_step(&self) -> Option<&JobStep> {
        self.steps
            .last()
            .filter(|step| step.status == JobState::Running)
    }

    /// Append a running step.
    ///
    /// # Errors
    ///
    /// Fails when the job is terminal or the previous step is still running.
    pub fn begin_step(&mut self, step: JobStepKind, now: DateTime<Utc>) -> Result<()> {
        self.ensure_running(&format!("step {}", step))?;
        if let Some(current) = self.current_step() {
            return Err(CoreError::InvalidStateTransition {
                job_id: self.id.to_string(),
                from: format!("step {} running", current.name),
                to: format!("step {}", step),
            });
        }

        self.steps.push(JobStep {
            name: step.as_str().to_string(),
            started_at: now,
            finished_at: None,
            status: JobState::Running,
            error: None,
        });
        Ok(())
    }

    /// Mark the running step completed.
    pub fn complete_step(&mut self, now: DateTime<Utc>) -> Result<&JobStep> {
        self.finish_step(JobState::Completed, None, now)
    }

    /// Mark the running step failed.
    pub fn fail_step(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<&JobStep> {
        self.finish_step(JobState::Failed, Some(message.into()), now)
    }

    fn finish_step(
        &mut self,
        status: JobState,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<&JobStep> {
        let job_id = self.id.to_string();
        match self.steps.last_mut() {
            Some(step) if step.status == JobState::Running => {
                step.status = status;
                step.finished_at = Some(now);
                step.error = error;
                Ok(&*step)
            }
            _ => Err(CoreError::InvalidStateTransition {
                job_id,
                from: "no running step".to_string(),
                to: format!("step {}", status),
            }),
        }
    }

    /// `running → completed`
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobState::Completed, now)
    }

    /// `running → failed`, recording the error and the failing step
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        step: Option<JobStepKind>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transition(JobState::Failed, now)?;
        self.error = Some(JobError {
            message: message.into(),
            step: step.map(|s| s.as_str().to_string()),
        });
        Ok(())
    }

    /// Fail the running step, if any, and the job itself. A terminal job is
    /// left untouched.
    pub fn abort(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }

        let message = message.into();
        let step = self.current_step().map(|step| step.name.clone());
        if step.is_some() {
            self.finish_step(JobState::Failed, Some(message.clone()), now).ok();
        }
        if self.transition(JobState::Failed, now).is_ok() {
            self.error = Some(JobError { message, step });
        }
    }

    fn transition(&mut self, to: JobState, now: DateTime<Utc>) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (JobState::Running, JobState::Completed) | (JobState::Running, JobState::Failed)
        );
        if !valid {
            return Err(CoreError::InvalidStateTransition {
                job_id: self.id.to_string(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        self.status = to;
        self.finished_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        Ok(())
    }

    fn ensure_running(&self, action: &str) -> Result<()> {
        if self.status != JobState::Running {
            return Err(CoreError::InvalidStateTransition {
                job_id: self.id.to_string(),
                from: self.status.to_string(),
                to: action.to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 31, 2, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_job_id_format() {
        let id = JobId::generate(at(0));
        let text = id.as_str();
        assert!(text.starts_with("job-20250131T020000-"), "{text}");
        let suffix = text.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(JobId::generate(at(0)), id);
    }

    #[test]
    fn test_job_type_steps() {
        let names: Vec<&str> = JobType::FullPipeline
            .steps()
            .iter()
            .map(|s| s.as_str())
            .collect();
        assert_eq!(names, vec!["validate_environment", "sync_data", "transform_data"]);
        assert_eq!(JobType::SyncOnly.steps(), &[JobStepKind::SyncData]);
        assert_eq!(JobType::TransformOnly.steps(), &[JobStepKind::TransformData]);
    }

    #[test]
    fn test_completed_job() {
        let mut job = JobStatus::new(JobType::SyncOnly, at(0));
        job.begin_step(JobStepKind::SyncData, at(1)).unwrap();
        assert_eq!(job.current_step().unwrap().name, "sync_data");

        let step = job.complete_step(at(4)).unwrap();
        assert_eq!(step.duration_ms(), Some(3000));

        job.complete(at(5)).unwrap();
        assert_eq!(job.status, JobState::Completed);
        assert_eq!(job.duration_ms, Some(5000));
        assert!(job.error.is_none());
    }

    #[test]
    fn test_failed_step_fails_job() {
        let mut job = JobStatus::new(JobType::FullPipeline, at(0));
        job.begin_step(JobStepKind::ValidateEnvironment, at(0)).unwrap();
        job.complete_step(at(1)).unwrap();
        job.begin_step(JobStepKind::SyncData, at(1)).unwrap();
        job.fail_step("connection refused", at(2)).unwrap();
        job.fail("connection refused", Some(JobStepKind::SyncData), at(2))
            .unwrap();

        assert_eq!(job.status, JobState::Failed);
        assert_eq!(job.steps.len(), 2);
        assert_eq!(job.steps[0].status, JobState::Completed);
        assert_eq!(job.steps[1].status, JobState::Failed);
        let error = job.error.unwrap();
        assert_eq!(error.message, "connection refused");
        assert_eq!(error.step.as_deref(), Some("sync_data"));
    }

    #[test]
    fn test_terminal_job_rejects_transitions() {
        let mut job = JobStatus::new(JobType::TransformOnly, at(0));
        job.complete(at(1)).unwrap();

        assert!(matches!(
            job.complete(at(2)),
            Err(CoreError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            job.fail("late", None, at(2)),
            Err(CoreError::InvalidStateTransition { .. })
        ));
        assert!(job.begin_step(JobStepKind::TransformData, at(2)).is_err());
        assert_eq!(job.finished_at, Some(at(1)));
    }

    #[test]
    fn test_abort_fails_running_step_and_job() {
        let mut job = JobStatus::new(JobType::TransformOnly, at(0));
        job.begin_step(JobStepKind::TransformData, at(1)).unwrap();

        job.abort("cancelled", at(3));

        assert_eq!(job.status, JobState::Failed);
        assert_eq!(job.steps[0].status, JobState::Failed);
        assert_eq!(job.steps[0].error.as_deref(), Some("cancelled"));
        let error = job.error.clone().unwrap();
        assert_eq!(error.step.as_deref(), Some("transform_data"));
        assert_eq!(job.duration_ms, Some(3000));

        // Terminal jobs keep their outcome
        job.abort("again", at(9));
        assert_eq!(job.error.unwrap().message, "cancelled");
        assert_eq!(job.finished_at, Some(at(3)));
    }

    #[test]
    fn test_steps_do_not_overlap() {
        let mut job = JobStatus::new(JobType::FullPipeline, at(0));
        job.begin_step(JobStepKind::ValidateEnvironment, at(0)).unwrap();
        assert!(job.begin_step(JobStepKind::SyncData, at(1)).is_err());
        assert!(job.complete_step(at(1)).is_ok());
        assert!(job.complete_step(at(2)).is_err());
    }

    #[test]
    fn test_serialization_uses_snake_case() {
        let job = JobStatus::new(JobType::FullPipeline, at(0));
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["job_type"], "full_pipeline");
        assert_eq!(json["status"], "running");
        assert!(json["id"].as_str().unwrap().starts_with("job-"));
    }
}
