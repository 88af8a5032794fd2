//! Pipeline jobs run through the service façade

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult,
    time::{Clock, FixedClock},
    transfer::ConnectionState,
    transform::{TransformOutput, TransformRunner},
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use core_runtime::config::{
    CoreConfig, RemoteAuth, RemoteEndpointConfig, ScheduleSettings, SyncSettings,
    TransformSettings,
};
use core_runtime::events::{CoreEvent, EventBus, JobEvent};
use core_service::{CoreError, CoreService, JobState, PIPELINE_TRIGGER};
use core_sync::testing::{MemoryTransferClient, ScriptedFailure};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

// ============================================================================
// Test Runner
// ============================================================================

/// Transform stand-in that writes a summary file and can be held mid-run
struct ScriptedRunner {
    summary_path: PathBuf,
    summary_timestamp: String,
    exit_code: i32,
    stderr: String,
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
    runs: AtomicUsize,
}

impl ScriptedRunner {
    fn succeeding(summary_path: &Path, timestamp: DateTime<Utc>) -> Self {
        Self {
            summary_path: summary_path.to_path_buf(),
            summary_timestamp: timestamp.to_rfc3339(),
            exit_code: 0,
            stderr: String::new(),
            gate: None,
            started: Arc::new(Notify::new()),
            runs: AtomicUsize::new(0),
        }
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransformRunner for ScriptedRunner {
    async fn run(&self) -> BridgeResult<TransformOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if self.exit_code == 0 {
            let summary = format!(
                r#"{{"conversion_summary": {{"timestamp": "{}", "total_clients": 2, "total_products": 1}}}}"#,
                self.summary_timestamp
            );
            tokio::fs::write(&self.summary_path, summary).await?;
        }

        Ok(TransformOutput {
            exit_code: Some(self.exit_code),
            stdout: "converted\n".to_string(),
            stderr: self.stderr.clone(),
            duration: Duration::from_millis(250),
        })
    }

    fn describe(&self) -> String {
        "scripted transform".to_string()
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    data: TempDir,
    config: CoreConfig,
    client: Arc<MemoryTransferClient>,
    event_bus: Arc<EventBus>,
    clock: Arc<FixedClock>,
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 31, 1, 59, 30).unwrap()
}

fn harness_with(schedule: ScheduleSettings) -> Harness {
    let data = tempfile::tempdir().unwrap();
    let program = data.path().join("convert.py");
    std::fs::write(&program, "print('converted')\n").unwrap();
    std::fs::create_dir_all(data.path().join("data")).unwrap();

    let config = CoreConfig::builder()
        .remote(RemoteEndpointConfig::new(
            "files.example.com",
            "sync",
            RemoteAuth::Agent,
        ))
        .data_root(data.path().join("data"))
        .sync_settings(SyncSettings::without_delays())
        .transform(TransformSettings::new(program.to_string_lossy()))
        .schedule(schedule)
        .build()
        .unwrap();

    let client = Arc::new(MemoryTransferClient::new());
    let remote_mtime = Some(now() - ChronoDuration::days(1));
    client.add_file("/Adressen", "Kunden.XML", b"<kunden/>", remote_mtime);
    client.add_file("/Artikel", "Artikel.XML", b"<artikel/>", remote_mtime);
    client.add_file("/History", "Historie.XML", b"<historie/>", remote_mtime);

    Harness {
        data,
        config,
        client,
        event_bus: Arc::new(EventBus::default()),
        clock: Arc::new(FixedClock::new(now())),
    }
}

fn harness() -> Harness {
    harness_with(ScheduleSettings::default())
}

impl Harness {
    fn service(&self, runner: Arc<dyn TransformRunner>) -> CoreService {
        let clock: Arc<dyn Clock> = self.clock.clone();
        CoreService::new(
            self.config.clone(),
            self.client.clone(),
            runner,
            self.event_bus.clone(),
            clock,
        )
        .unwrap()
    }

    fn runner(&self) -> ScriptedRunner {
        ScriptedRunner::succeeding(&self.config.summary_path, now())
    }
}

/// Wait until the runner has been entered, then read the active job id
async fn wait_for_active_job(service: &CoreService, started: &Notify) -> String {
    started.notified().await;
    service
        .orchestrator()
        .active_job_id()
        .await
        .expect("a job is active while the transform runs")
        .to_string()
}

// ============================================================================
// Jobs
// ============================================================================

#[tokio::test]
async fn test_full_pipeline_runs_all_steps() {
    let h = harness();
    let runner = Arc::new(h.runner());
    let service = h.service(runner.clone());

    let job = service.run_full_pipeline().await.unwrap();

    assert_eq!(job.status, JobState::Completed, "{:?}", job.error);
    let steps: Vec<&str> = job.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(steps, vec!["validate_environment", "sync_data", "transform_data"]);
    assert!(job.steps.iter().all(|s| s.status == JobState::Completed));

    let sync = job.sync_result.as_ref().unwrap();
    assert_eq!(sync.totals.downloaded, 3);
    assert_eq!(sync.totals.errors, 0);
    assert!(h.config.mirror_root.join("Artikel/Artikel.XML").exists());

    let transform = job.transform_result.as_ref().unwrap();
    assert_eq!(transform.exit_code, 0);
    assert_eq!(
        transform.summary.as_ref().unwrap().conversion_summary.total_clients,
        2
    );
    assert_eq!(runner.runs(), 1);

    // Environment check plus the pass
    assert_eq!(h.client.connect_count(), 2);
    assert_eq!(service.history().await, vec![job]);
}

#[tokio::test]
async fn test_failing_sync_step_stops_the_pipeline() {
    let h = harness();
    h.client.fail_lists("/Artikel", 1, ScriptedFailure::Denied);
    let runner = Arc::new(h.runner());
    let service = h.service(runner.clone());
    let mut events = h.event_bus.subscribe();

    let job = service.run_full_pipeline().await.unwrap();

    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.steps.len(), 2);
    assert_eq!(job.steps[0].name, "validate_environment");
    assert_eq!(job.steps[0].status, JobState::Completed);
    assert_eq!(job.steps[1].name, "sync_data");
    assert_eq!(job.steps[1].status, JobState::Failed);

    let error = job.error.as_ref().unwrap();
    assert_eq!(error.step.as_deref(), Some("sync_data"));
    assert_eq!(Some(&error.message), job.steps[1].error.as_ref());
    assert!(job.sync_result.is_none());
    assert!(job.transform_result.is_none());
    assert_eq!(runner.runs(), 0);

    let mut failed = None;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Job(JobEvent::Failed { step, .. }) = event {
            failed = step;
        }
    }
    assert_eq!(failed.as_deref(), Some("sync_data"));
}

#[tokio::test]
async fn test_environment_problems_are_reported_together() {
    let mut h = harness();
    h.config.transform.program = h.data.path().join("missing.py").to_string_lossy().into_owned();
    h.client.fail_connects(1, ScriptedFailure::Refused);
    let runner = Arc::new(h.runner());
    let service = h.service(runner.clone());

    let job = service.run_full_pipeline().await.unwrap();

    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.steps.len(), 1);
    let error = job.error.unwrap();
    assert_eq!(error.step.as_deref(), Some("validate_environment"));
    assert!(error.message.contains("missing.py"), "{}", error.message);
    assert!(error.message.contains("Connection test failed"), "{}", error.message);
    assert_eq!(runner.runs(), 0);
}

#[tokio::test]
async fn test_transform_exit_code_fails_job() {
    let h = harness();
    let mut runner = h.runner();
    runner.exit_code = 1;
    runner.stderr = "parse error line 12\n".to_string();
    let service = h.service(Arc::new(runner));

    let job = service.run_transform().await.unwrap();

    assert_eq!(job.status, JobState::Failed);
    assert_eq!(
        job.error.unwrap().message,
        "Transform exited with code 1: parse error line 12"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_job_is_rejected_while_one_is_active() {
    let h = harness();
    let gate = Arc::new(Notify::new());
    let runner = h.runner().gated(gate.clone());
    let started = runner.started.clone();
    let service = h.service(Arc::new(runner));

    let background = {
        let service = service.clone();
        tokio::spawn(async move { service.run_transform().await })
    };
    let active_id = wait_for_active_job(&service, &started).await;

    match service.run_sync().await {
        Err(CoreError::JobInProgress { job_id }) => assert_eq!(job_id, active_id),
        other => panic!("expected JobInProgress, got {:?}", other),
    }
    assert_eq!(service.status().await.jobs.active_jobs.len(), 1);

    gate.notify_one();
    let first = background.await.unwrap().unwrap();
    assert_eq!(first.id.as_str(), active_id);
    assert_eq!(first.status, JobState::Completed);

    // The rejected call left no trace
    assert_eq!(service.history().await.len(), 1);
    assert_eq!(h.client.connect_count(), 0);
}

#[tokio::test]
async fn test_dropped_job_is_failed_and_frees_the_slot() {
    let h = harness();
    let runner = h.runner().gated(Arc::new(Notify::new()));
    let started = runner.started.clone();
    let service = h.service(Arc::new(runner));
    let mut events = h.event_bus.subscribe();

    let background = {
        let service = service.clone();
        tokio::spawn(async move { service.run_transform().await })
    };
    let active_id = wait_for_active_job(&service, &started).await;

    background.abort();
    assert!(background.await.unwrap_err().is_cancelled());

    assert!(service.orchestrator().active_jobs().await.is_empty());
    let history = service.history().await;
    assert_eq!(history.len(), 1);
    let dropped = &history[0];
    assert_eq!(dropped.id.as_str(), active_id);
    assert_eq!(dropped.status, JobState::Failed);
    assert_eq!(dropped.steps[0].status, JobState::Failed);
    let error = dropped.error.clone().unwrap();
    assert_eq!(error.message, "Job cancelled before completion");
    assert_eq!(error.step.as_deref(), Some("transform_data"));

    let mut failed = None;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Job(JobEvent::Failed { job_id, .. }) = event {
            failed = Some(job_id);
        }
    }
    assert_eq!(failed, Some(active_id));

    let next = service.run_sync().await.unwrap();
    assert_eq!(next.status, JobState::Completed, "{:?}", next.error);
    assert_eq!(service.history().await.len(), 2);
}

#[tokio::test]
async fn test_history_keeps_most_recent_jobs() {
    let mut h = harness();
    h.config.history_capacity = 3;
    let service = h.service(Arc::new(h.runner()));

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(service.run_transform().await.unwrap().id);
    }

    let history: Vec<_> = service.history().await.into_iter().map(|j| j.id).collect();
    assert_eq!(history, ids[1..].to_vec());
    assert!(service.job(ids[0].as_str()).await.is_none());
    assert!(service.job(ids[3].as_str()).await.is_some());
}

// ============================================================================
// Probes
// ============================================================================

#[tokio::test]
async fn test_connection_timeout_is_reported() {
    let h = harness();
    h.client.fail_connects(1, ScriptedFailure::Timeout);
    let service = h.service(Arc::new(h.runner()));

    let report = service.test_connection().await.unwrap();

    assert!(!report.success);
    assert!(report.message.contains("timed out"), "{}", report.message);
    assert_ne!(h.client.current_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_freshness_follows_transform() {
    let h = harness();
    let service = h.service(Arc::new(h.runner()));

    let before = service.check_freshness().await;
    assert!(!before.fresh);

    service.run_transform().await.unwrap();
    let after = service.check_freshness().await;
    assert!(after.fresh, "{}", after.message);
    assert_eq!(after.age_secs, Some(0));

    h.clock.advance(ChronoDuration::hours(26));
    let later = service.check_freshness().await;
    assert!(!later.fresh);
    assert_eq!(later.tolerance_secs, 25 * 3600);
}

// ============================================================================
// Scheduler
// ============================================================================

#[test]
fn test_invalid_cron_is_rejected() {
    let h = harness_with(ScheduleSettings {
        pipeline_cron: "0 25 * * *".to_string(),
        ..ScheduleSettings::default()
    });

    let result = CoreService::new(
        h.config.clone(),
        h.client.clone(),
        Arc::new(h.runner()),
        h.event_bus.clone(),
        h.clock.clone(),
    );
    assert!(matches!(result, Err(CoreError::InvalidSchedule { .. })));
}

#[tokio::test]
async fn test_scheduler_status_lists_triggers() {
    let h = harness();
    let service = h.service(Arc::new(h.runner()));

    service.start_scheduler().await.unwrap();
    let status = service.status().await;
    assert!(status.scheduler_running);
    let names: Vec<&str> = status.triggers.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["data-pipeline", "freshness-probe"]);
    assert_eq!(status.triggers[0].expression, "0 2 * * *");
    assert!(status.triggers.iter().all(|t| t.next_run.is_some()));

    service.stop_scheduler().await;
    assert!(!service.status().await.scheduler_running);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_pipeline_is_skipped_while_busy() {
    let h = harness_with(ScheduleSettings {
        pipeline_cron: "* * * * *".to_string(),
        ..ScheduleSettings::default()
    });
    let gate = Arc::new(Notify::new());
    let runner = h.runner().gated(gate.clone());
    let started = runner.started.clone();
    let service = h.service(Arc::new(runner));
    let mut events = h.event_bus.subscribe();

    let background = {
        let service = service.clone();
        tokio::spawn(async move { service.run_transform().await })
    };
    let active_id = wait_for_active_job(&service, &started).await;

    service.start_scheduler().await.unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;
    service.stop_scheduler().await;

    let mut skipped = None;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Job(JobEvent::Skipped {
            trigger,
            active_job_id,
        }) = event
        {
            skipped = Some((trigger, active_job_id));
        }
    }
    assert_eq!(
        skipped,
        Some((PIPELINE_TRIGGER.to_string(), active_id.clone()))
    );

    gate.notify_one();
    let job = background.await.unwrap().unwrap();
    assert_eq!(job.id.as_str(), active_id);
    assert_eq!(service.history().await.len(), 1);
}

// ============================================================================
// Process runner
// ============================================================================

#[cfg(all(unix, feature = "desktop-shims"))]
#[tokio::test]
async fn test_process_transform_failure_surfaces_stderr() {
    use bridge_desktop::ProcessTransformRunner;

    let h = harness();
    let runner = ProcessTransformRunner::new("sh")
        .with_args(["-c", "echo 'parse error line 12' >&2; exit 1"]);
    let service = h.service(Arc::new(runner));

    let job = service.run_transform().await.unwrap();

    assert_eq!(job.status, JobState::Failed);
    assert_eq!(
        job.error.unwrap().message,
        "Transform exited with code 1: parse error line 12"
    );
}
