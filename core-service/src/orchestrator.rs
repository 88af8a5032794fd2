//! # Job Orchestrator
//!
//! Runs pipeline jobs one at a time and keeps their history.
//!
//! ## Overview
//!
//! A job is a fixed sequence of steps determined by its [`JobType`]:
//!
//! | Job type        | Steps                                                   |
//! |-----------------|---------------------------------------------------------|
//! | `FullPipeline`  | `validate_environment` → `sync_data` → `transform_data` |
//! | `SyncOnly`      | `sync_data`                                             |
//! | `TransformOnly` | `transform_data`                                        |
//!
//! The first failing step fails the job and later steps never start. A failed
//! job is still a successful return: callers inspect [`JobStatus::status`].
//!
//! Only one job is active at a time. Starting a job while another is active
//! returns [`CoreError::JobInProgress`] and creates nothing. Active jobs and
//! history live behind a single mutex that is never held across an await.
//!
//! A job whose future is dropped before it finishes (aborted task, caller
//! timeout) is failed with "Job cancelled before completion" and moved to
//! history, so the next job can start.

use crate::environment::EnvironmentCheck;
use crate::history::JobHistory;
use crate::job::{JobId, JobState, JobStatus, JobStepKind, JobType};
use crate::transform::{TransformResult, TransformStage};
use crate::{CoreError, Result};
use bridge_traits::time::Clock;
use core_runtime::events::{CoreEvent, EventBus, JobEvent};
use core_sync::{ConnectionTestReport, SyncCoordinator, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// What a finished step leaves on the job
enum StepOutput {
    None,
    Sync(SyncResult),
    Transform(TransformResult),
}

#[derive(Debug, Default)]
struct JobRegistry {
    active: HashMap<JobId, JobStatus>,
    history: JobHistory,
}

/// Snapshot of the orchestrator's jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub active_jobs: Vec<JobStatus>,
    pub last_job: Option<JobStatus>,
    pub history_len: usize,
    pub history_capacity: usize,
    pub sync_in_progress: bool,
}

pub struct JobOrchestrator {
    coordinator: Arc<SyncCoordinator>,
    transform: TransformStage,
    environment: EnvironmentCheck,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    jobs: Arc<Mutex<JobRegistry>>,
}

impl JobOrchestrator {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        transform: TransformStage,
        environment: EnvironmentCheck,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        history_capacity: usize,
    ) -> Self {
        Self {
            coordinator,
            transform,
            environment,
            event_bus,
            clock,
            jobs: Arc::new(Mutex::new(JobRegistry {
                active: HashMap::new(),
                history: JobHistory::new(history_capacity),
            })),
        }
    }

    pub async fn run_full_pipeline(&self) -> Result<JobStatus> {
        self.run(JobType::FullPipeline).await
    }

    pub async fn run_sync_only(&self) -> Result<JobStatus> {
        self.run(JobType::SyncOnly).await
    }

    pub async fn run_transform_only(&self) -> Result<JobStatus> {
        self.run(JobType::TransformOnly).await
    }

    /// Run a job to completion and return its terminal status.
    ///
    /// # Errors
    ///
    /// [`CoreError::JobInProgress`] when another job is active. Step failures
    /// are reported on the returned job, not as errors.
    #[instrument(skip(self))]
    pub async fn run(&self, job_type: JobType) -> Result<JobStatus> {
        let (mut job, guard) = self.begin(job_type)?;
        info!(job_id = %job.id, job_type = %job_type, "Job started");

        for &step in job_type.steps() {
            job.begin_step(step, self.clock.now())?;
            self.publish(&job);
            self.emit(JobEvent::StepStarted {
                job_id: job.id.to_string(),
                step: step.to_string(),
            });
            info!(job_id = %job.id, step = %step, "Step started");

            match self.execute(step).await {
                Ok(output) => {
                    let duration_ms = job
                        .complete_step(self.clock.now())?
                        .duration_ms()
                        .unwrap_or_default();
                    match output {
                        StepOutput::Sync(result) => job.sync_result = Some(result),
                        StepOutput::Transform(result) => job.transform_result = Some(result),
                        StepOutput::None => {}
                    }
                    self.publish(&job);
                    self.emit(JobEvent::StepCompleted {
                        job_id: job.id.to_string(),
                        step: step.to_string(),
                        duration_ms,
                    });
                    info!(job_id = %job.id, step = %step, duration_ms, "Step completed");
                }
                Err(e) => {
                    let message = e.to_string();
                    let now = self.clock.now();
                    job.fail_step(message.clone(), now)?;
                    job.fail(message.clone(), Some(step), now)?;
                    self.emit(JobEvent::StepFailed {
                        job_id: job.id.to_string(),
                        step: step.to_string(),
                        message: message.clone(),
                    });
                    error!(job_id = %job.id, step = %step, error = %message, "Step failed");
                    return Ok(guard.finish(job));
                }
            }
        }

        job.complete(self.clock.now())?;
        Ok(guard.finish(job))
    }

    /// Create the job and register it as active, unless one is already active.
    fn begin(&self, job_type: JobType) -> Result<(JobStatus, ActiveJobGuard)> {
        let mut jobs = self.jobs.lock();
        if let Some(active) = jobs.active.keys().next() {
            warn!(active_job_id = %active, job_type = %job_type, "Job rejected, another job is active");
            return Err(CoreError::JobInProgress {
                job_id: active.to_string(),
            });
        }

        let job = JobStatus::new(job_type, self.clock.now());
        jobs.active.insert(job.id.clone(), job.clone());
        drop(jobs);

        self.emit(JobEvent::Started {
            job_id: job.id.to_string(),
            job_type: job_type.to_string(),
        });

        let guard = ActiveJobGuard {
            jobs: Arc::clone(&self.jobs),
            event_bus: Arc::clone(&self.event_bus),
            clock: Arc::clone(&self.clock),
            job_id: job.id.clone(),
            armed: true,
        };
        Ok((job, guard))
    }

    fn publish(&self, job: &JobStatus) {
        self.jobs.lock().active.insert(job.id.clone(), job.clone());
    }

    async fn execute(&self, step: JobStepKind) -> Result<StepOutput> {
        match step {
            JobStepKind::ValidateEnvironment => {
                self.environment.validate().await?;
                Ok(StepOutput::None)
            }
            JobStepKind::SyncData => {
                let result = self.coordinator.sync_all().await?;
                Ok(StepOutput::Sync(result))
            }
            JobStepKind::TransformData => {
                let result = self.transform.run().await?;
                Ok(StepOutput::Transform(result))
            }
        }
    }

    /// Probe the remote without starting a job.
    pub async fn test_connection(&self) -> Result<ConnectionTestReport> {
        Ok(self.coordinator.test_connection().await?)
    }

    pub async fn active_jobs(&self) -> Vec<JobStatus> {
        self.jobs.lock().active.values().cloned().collect()
    }

    /// Id of the active job, if any
    pub async fn active_job_id(&self) -> Option<JobId> {
        self.jobs.lock().active.keys().next().cloned()
    }

    /// Finished jobs, oldest first
    pub async fn history(&self) -> Vec<JobStatus> {
        self.jobs.lock().history.to_vec()
    }

    /// Look up a job by id, active or finished
    pub async fn job(&self, id: &str) -> Option<JobStatus> {
        let jobs = self.jobs.lock();
        let found = jobs
            .active
            .values()
            .chain(jobs.history.iter())
            .find(|job| job.id.as_str() == id)
            .cloned();
        found
    }

    pub async fn status_report(&self) -> OrchestratorStatus {
        let jobs = self.jobs.lock();
        OrchestratorStatus {
            active_jobs: jobs.active.values().cloned().collect(),
            last_job: jobs.history.last().cloned(),
            history_len: jobs.history.len(),
            history_capacity: jobs.history.capacity(),
            sync_in_progress: self.coordinator.is_busy(),
        }
    }

    fn emit(&self, event: JobEvent) {
        self.event_bus.emit(CoreEvent::Job(event)).ok();
    }
}

// ============================================================================
// Active Job Guard
// ============================================================================

/// Message recorded on a job whose future was dropped mid-run
const JOB_CANCELLED: &str = "Job cancelled before completion";

/// Owns the active registration of one job.
///
/// [`finish`](Self::finish) moves the terminal job into history. Dropping the
/// guard without finishing fails the last published snapshot of the job and
/// moves that instead.
struct ActiveJobGuard {
    jobs: Arc<Mutex<JobRegistry>>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    job_id: JobId,
    armed: bool,
}

impl ActiveJobGuard {
    fn finish(mut self, job: JobStatus) -> JobStatus {
        self.armed = false;
        settle(&self.jobs, &self.event_bus, &job);
        job
    }
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let snapshot = self.jobs.lock().active.remove(&self.job_id);
        if let Some(mut job) = snapshot {
            job.abort(JOB_CANCELLED, self.clock.now());
            warn!(job_id = %job.id, "Job dropped before completion");
            settle(&self.jobs, &self.event_bus, &job);
        }
    }
}

/// Move a terminal job from the active map into history and announce it.
fn settle(jobs: &Mutex<JobRegistry>, event_bus: &EventBus, job: &JobStatus) {
    {
        let mut jobs = jobs.lock();
        jobs.active.remove(&job.id);
        if let Some(evicted) = jobs.history.push(job.clone()) {
            tracing::debug!(job_id = %evicted.id, "Evicted job from history");
        }
    }

    let event = match job.status {
        JobState::Completed => {
            info!(job_id = %job.id, duration_ms = ?job.duration_ms, "Job completed");
            JobEvent::Completed {
                job_id: job.id.to_string(),
                duration_ms: job.duration_ms.unwrap_or_default(),
            }
        }
        _ => {
            let error = job.error.clone();
            warn!(job_id = %job.id, error = ?error, "Job failed");
            JobEvent::Failed {
                job_id: job.id.to_string(),
                step: error.as_ref().and_then(|e| e.step.clone()),
                message: error.map(|e| e.message).unwrap_or_default(),
            }
        }
    };
    event_bus.emit(CoreEvent::Job(event)).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::time::SystemClock;
    use bridge_traits::transform::{TransformOutput, TransformRunner};
    use core_runtime::config::{CoreConfig, RemoteAuth, RemoteEndpointConfig, SyncSettings};
    use core_sync::testing::MemoryTransferClient;
    use mockall::mock;
    use std::time::Duration;

    mock! {
        Runner {}

        #[async_trait]
        impl TransformRunner for Runner {
            async fn run(&self) -> BridgeResult<TransformOutput>;
            fn describe(&self) -> String;
        }
    }

    fn orchestrator(runner: MockRunner, data_root: &std::path::Path) -> JobOrchestrator {
        let config = CoreConfig::builder()
            .remote(RemoteEndpointConfig::new("memory.test", "sync", RemoteAuth::Agent))
            .data_root(data_root)
            .sync_settings(SyncSettings::without_delays())
            .history_capacity(2)
            .build()
            .unwrap();

        let client = MemoryTransferClient::new();
        client.add_directory("/Adressen");
        client.add_directory("/Artikel");
        client.add_directory("/History");

        let event_bus = Arc::new(EventBus::default());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let coordinator = Arc::new(SyncCoordinator::new(
            &config,
            Arc::new(client),
            event_bus.clone(),
            clock.clone(),
        ));

        JobOrchestrator::new(
            coordinator.clone(),
            TransformStage::new(Arc::new(runner), &config.summary_path),
            EnvironmentCheck::new(&config.data_root, "sh", coordinator),
            event_bus,
            clock,
            config.history_capacity,
        )
    }

    fn succeeding_runner(times: usize) -> MockRunner {
        let mut runner = MockRunner::new();
        runner.expect_describe().return_const("convert".to_string());
        runner.expect_run().times(times).returning(|| {
            Ok(TransformOutput {
                exit_code: Some(0),
                stdout: "done".to_string(),
                stderr: String::new(),
                duration: Duration::from_millis(10),
            })
        });
        runner
    }

    #[tokio::test]
    async fn test_sync_only_job() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(succeeding_runner(0), dir.path());

        let job = orchestrator.run_sync_only().await.unwrap();

        assert_eq!(job.status, JobState::Completed);
        assert_eq!(job.steps.len(), 1);
        assert_eq!(job.steps[0].name, "sync_data");
        assert!(job.sync_result.is_some());
        assert!(job.transform_result.is_none());
        assert!(orchestrator.active_jobs().await.is_empty());
        assert_eq!(orchestrator.job(job.id.as_str()).await, Some(job));
    }

    #[tokio::test]
    async fn test_transform_failure_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockRunner::new();
        runner.expect_describe().return_const("convert".to_string());
        runner.expect_run().times(1).returning(|| {
            Ok(TransformOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "parse error line 12".to_string(),
                duration: Duration::from_millis(10),
            })
        });
        let orchestrator = orchestrator(runner, dir.path());

        let job = orchestrator.run_transform_only().await.unwrap();

        assert_eq!(job.status, JobState::Failed);
        let error = job.error.unwrap();
        assert_eq!(error.message, "Transform exited with code 1: parse error line 12");
        assert_eq!(error.step.as_deref(), Some("transform_data"));
        assert_eq!(job.steps[0].status, JobState::Failed);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(succeeding_runner(3), dir.path());

        let first = orchestrator.run_transform_only().await.unwrap();
        let second = orchestrator.run_transform_only().await.unwrap();
        let third = orchestrator.run_transform_only().await.unwrap();

        let ids: Vec<JobId> = orchestrator.history().await.into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second.id, third.id.clone()]);
        assert!(orchestrator.job(first.id.as_str()).await.is_none());

        let status = orchestrator.status_report().await;
        assert_eq!(status.history_len, 2);
        assert_eq!(status.last_job.unwrap().id, third.id);
        assert!(!status.sync_in_progress);
    }
}
