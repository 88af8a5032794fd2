//! # Core Service
//!
//! Façade over the sync and orchestration engine.
//!
//! ## Overview
//!
//! [`CoreService`] is built from a validated [`CoreConfig`] and the
//! host-provided collaborators: a [`TransferClient`] for the remote file
//! source, a [`TransformRunner`] for the conversion step, an [`EventBus`] and
//! a [`Clock`]. It exposes the on-demand commands and the recurring schedule:
//!
//! - `run_sync`, `run_transform`, `run_full_pipeline` start jobs
//! - `test_connection` probes the remote without touching local files
//! - `check_freshness` reports the age of the last transform
//! - `status` summarizes jobs, triggers and the sync lock
//! - `start_scheduler` / `stop_scheduler` control the cron triggers
//!
//! Desktop hosts enable the `desktop-shims` feature and call
//! [`bootstrap_desktop`], which wires the SFTP client and the process runner.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_service::bootstrap_desktop;
//!
//! let service = bootstrap_desktop(config)?;
//! let job = service.run_full_pipeline().await?;
//! println!("{} finished as {}", job.id, job.status);
//!
//! service.start_scheduler().await?;
//! ```

pub mod cron;
pub mod environment;
pub mod error;
pub mod freshness;
pub mod history;
pub mod job;
pub mod orchestrator;
pub mod scheduler;
pub mod transform;

pub use cron::CronSchedule;
pub use error::{CoreError, Result};
pub use freshness::{FreshnessProbe, FreshnessReport};
pub use history::JobHistory;
pub use job::{JobError, JobId, JobState, JobStatus, JobStep, JobStepKind, JobType};
pub use orchestrator::{JobOrchestrator, OrchestratorStatus};
pub use scheduler::{Scheduler, Trigger, TriggerInfo, FRESHNESS_TRIGGER, PIPELINE_TRIGGER};
pub use transform::{ConversionReport, ConversionSummary, TransformResult, TransformStage};

use bridge_traits::{time::Clock, transfer::TransferClient, transform::TransformRunner};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, JobEvent};
use core_sync::{ConnectionTestReport, SyncCoordinator};
use environment::EnvironmentCheck;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

/// Snapshot returned by [`CoreService::status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub endpoint: String,
    pub data_root: PathBuf,
    pub mirror_root: PathBuf,
    pub jobs: OrchestratorStatus,
    pub scheduler_running: bool,
    pub triggers: Vec<TriggerInfo>,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    coordinator: Arc<SyncCoordinator>,
    orchestrator: Arc<JobOrchestrator>,
    freshness: Arc<FreshnessProbe>,
    scheduler: Arc<Scheduler>,
    event_bus: Arc<EventBus>,
}

impl CoreService {
    /// Wire the service from its collaborators.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Config`] when the configuration is invalid
    /// - [`CoreError::InvalidSchedule`] when a cron expression cannot be parsed
    pub fn new(
        config: CoreConfig,
        client: Arc<dyn TransferClient>,
        runner: Arc<dyn TransformRunner>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline_schedule = CronSchedule::parse(&config.schedule.pipeline_cron)?;
        let freshness_schedule = CronSchedule::parse(&config.schedule.freshness_cron)?;

        let coordinator = Arc::new(SyncCoordinator::new(
            &config,
            client,
            event_bus.clone(),
            clock.clone(),
        ));

        let environment = EnvironmentCheck::new(
            &config.data_root,
            &config.transform.program,
            coordinator.clone(),
        )
        .with_working_dir(config.transform_working_dir());

        let orchestrator = Arc::new(JobOrchestrator::new(
            coordinator.clone(),
            TransformStage::new(runner, &config.summary_path),
            environment,
            event_bus.clone(),
            clock.clone(),
            config.history_capacity,
        ));

        let freshness = Arc::new(FreshnessProbe::new(
            &config.summary_path,
            config.schedule.freshness_tolerance,
            clock.clone(),
            event_bus.clone(),
        ));

        let scheduler = Arc::new(Scheduler::new(
            vec![
                pipeline_trigger(pipeline_schedule, orchestrator.clone(), event_bus.clone()),
                freshness_trigger(freshness_schedule, freshness.clone()),
            ],
            clock,
        ));

        info!(endpoint = %coordinator.endpoint(), data_root = %config.data_root.display(), "Core service ready");

        Ok(Self {
            config: Arc::new(config),
            coordinator,
            orchestrator,
            freshness,
            scheduler,
            event_bus,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn orchestrator(&self) -> Arc<JobOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    /// Run a sync-only job.
    #[instrument(skip(self))]
    pub async fn run_sync(&self) -> Result<JobStatus> {
        self.orchestrator.run_sync_only().await
    }

    /// Run a transform-only job.
    #[instrument(skip(self))]
    pub async fn run_transform(&self) -> Result<JobStatus> {
        self.orchestrator.run_transform_only().await
    }

    /// Validate, sync and transform as one job.
    #[instrument(skip(self))]
    pub async fn run_full_pipeline(&self) -> Result<JobStatus> {
        self.orchestrator.run_full_pipeline().await
    }

    #[instrument(skip(self))]
    pub async fn test_connection(&self) -> Result<ConnectionTestReport> {
        self.orchestrator.test_connection().await
    }

    #[instrument(skip(self))]
    pub async fn check_freshness(&self) -> FreshnessReport {
        self.freshness.check().await
    }

    pub async fn history(&self) -> Vec<JobStatus> {
        self.orchestrator.history().await
    }

    pub async fn job(&self, id: &str) -> Option<JobStatus> {
        self.orchestrator.job(id).await
    }

    pub async fn status(&self) -> ServiceStatus {
        ServiceStatus {
            endpoint: self.coordinator.endpoint(),
            data_root: self.config.data_root.clone(),
            mirror_root: self.config.mirror_root.clone(),
            jobs: self.orchestrator.status_report().await,
            scheduler_running: self.scheduler.is_running().await,
            triggers: self.scheduler.triggers().await,
        }
    }

    pub async fn start_scheduler(&self) -> Result<()> {
        self.scheduler.start().await
    }

    pub async fn stop_scheduler(&self) {
        self.scheduler.stop().await
    }
}

fn pipeline_trigger(
    schedule: CronSchedule,
    orchestrator: Arc<JobOrchestrator>,
    event_bus: Arc<EventBus>,
) -> Trigger {
    Trigger::new(
        PIPELINE_TRIGGER,
        schedule,
        "Validate, sync and transform",
        move || {
            let orchestrator = orchestrator.clone();
            let event_bus = event_bus.clone();
            async move {
                match orchestrator.run_full_pipeline().await {
                    Ok(job) => {
                        info!(job_id = %job.id, status = %job.status, "Scheduled pipeline finished");
                        Ok(())
                    }
                    Err(CoreError::JobInProgress { job_id }) => {
                        info!(active_job_id = %job_id, "Skipping scheduled pipeline, a job is active");
                        event_bus
                            .emit(CoreEvent::Job(JobEvent::Skipped {
                                trigger: PIPELINE_TRIGGER.to_string(),
                                active_job_id: job_id,
                            }))
                            .ok();
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        },
    )
}

fn freshness_trigger(schedule: CronSchedule, probe: Arc<FreshnessProbe>) -> Trigger {
    Trigger::new(
        FRESHNESS_TRIGGER,
        schedule,
        "Check the age of the last transform",
        move || {
            let probe = probe.clone();
            async move {
                probe.check().await;
                Ok(())
            }
        },
    )
}

/// Wire the service with the SFTP client and the process transform runner.
///
/// ```no_run
/// # #[cfg(feature = "desktop-shims")]
/// # fn example(config: core_runtime::config::CoreConfig) -> core_service::Result<()> {
/// let service = core_service::bootstrap_desktop(config)?;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub fn bootstrap_desktop(config: CoreConfig) -> Result<CoreService> {
    use bridge_desktop::ProcessTransformRunner;
    use bridge_traits::time::SystemClock;
    use provider_sftp::{SftpConfig, SftpTransferClient};

    config.validate()?;

    let client = Arc::new(SftpTransferClient::new(SftpConfig::from_core_config(&config)));
    let runner = Arc::new(
        ProcessTransformRunner::new(&config.transform.program)
            .with_args(config.transform.args.clone())
            .with_working_dir(config.transform_working_dir())
            .with_timeout(config.transform.timeout),
    );

    CoreService::new(
        config,
        client,
        runner,
        Arc::new(EventBus::default()),
        Arc::new(SystemClock),
    )
}
