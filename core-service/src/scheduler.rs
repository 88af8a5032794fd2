//! # Scheduler
//!
//! Runs recurring triggers on cron schedules evaluated in local time.
//!
//! ## Overview
//!
//! Each trigger gets its own task that sleeps until the next fire time and
//! then runs the trigger's handler. Tasks stop when the scheduler's
//! cancellation token fires. A handler that is already running finishes
//! before its task exits.
//!
//! ```text
//! ┌─────────── Scheduler ───────────┐
//! │ data-pipeline   0 2 * * *  ─────┼──► full pipeline job
//! │ freshness-probe 0 * * * *  ─────┼──► freshness probe
//! └─────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let scheduler = Scheduler::new(vec![trigger], clock);
//! scheduler.start().await?;
//! // ...
//! scheduler.stop().await;
//! ```

use crate::cron::CronSchedule;
use crate::{CoreError, Result};
use bridge_traits::time::Clock;
use chrono::{DateTime, Local, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const PIPELINE_TRIGGER: &str = "data-pipeline";
pub const FRESHNESS_TRIGGER: &str = "freshness-probe";

pub type TriggerHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A named cron schedule and the work it runs
pub struct Trigger {
    name: String,
    schedule: CronSchedule,
    description: String,
    handler: TriggerHandler,
    times: RwLock<TriggerTimes>,
}

#[derive(Debug, Clone, Copy, Default)]
struct TriggerTimes {
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
}

impl Trigger {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        schedule: CronSchedule,
        description: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            schedule,
            description: description.into(),
            handler: Arc::new(move || handler().boxed()),
            times: RwLock::new(TriggerTimes::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    async fn info(&self) -> TriggerInfo {
        let times = *self.times.read().await;
        TriggerInfo {
            name: self.name.clone(),
            expression: self.schedule.expression().to_string(),
            description: self.description.clone(),
            last_run: times.last_run,
            next_run: times.next_run,
        }
    }

    /// Next fire time strictly after both `now` and the previous fire time
    fn next_fire(&self, now: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let from = previous.map_or(now, |previous| previous.max(now));
        self.schedule
            .next_after(&from.with_timezone(&Local))
            .map(|next| next.with_timezone(&Utc))
    }
}

/// Snapshot of one trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub name: String,
    pub expression: String,
    pub description: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

struct RunningTriggers {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    triggers: Vec<Arc<Trigger>>,
    running: Mutex<Option<RunningTriggers>>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(triggers: Vec<Trigger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            triggers: triggers.into_iter().map(Arc::new).collect(),
            running: Mutex::new(None),
            clock,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Spawn one task per trigger. Does nothing when already running.
    ///
    /// # Errors
    ///
    /// [`CoreError::Scheduler`] when called outside a Tokio runtime.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            info!("Scheduler already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CoreError::Scheduler(format!("No async runtime available: {}", e)))?;

        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.triggers.len());
        for trigger in &self.triggers {
            let next_run = trigger.next_fire(self.clock.now(), None);
            {
                let mut times = trigger.times.write().await;
                times.next_run = next_run;
            }
            info!(
                trigger = %trigger.name,
                expression = %trigger.schedule,
                next_run = ?next_run,
                "Trigger scheduled"
            );

            handles.push(runtime.spawn(run_trigger(
                Arc::clone(trigger),
                cancel.child_token(),
                Arc::clone(&self.clock),
            )));
        }

        *running = Some(RunningTriggers { cancel, handles });
        info!(triggers = self.triggers.len(), "Scheduler started");
        Ok(())
    }

    /// Cancel every trigger task and wait for it. Does nothing when stopped.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            info!("Scheduler not running");
            return;
        };

        running.cancel.cancel();
        for handle in running.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Trigger task ended abnormally");
            }
        }

        for trigger in &self.triggers {
            trigger.times.write().await.next_run = None;
        }
        info!("Scheduler stopped");
    }

    pub async fn triggers(&self) -> Vec<TriggerInfo> {
        let mut infos = Vec::with_capacity(self.triggers.len());
        for trigger in &self.triggers {
            infos.push(trigger.info().await);
        }
        infos
    }
}

async fn run_trigger(trigger: Arc<Trigger>, cancel: CancellationToken, clock: Arc<dyn Clock>) {
    let mut previous = None;

    loop {
        let Some(next_run) = trigger.next_fire(clock.now(), previous) else {
            warn!(trigger = %trigger.name, "Schedule never fires again");
            break;
        };
        trigger.times.write().await.next_run = Some(next_run);

        let delay = (next_run - clock.now()).to_std().unwrap_or(Duration::ZERO);
        debug!(trigger = %trigger.name, delay_secs = delay.as_secs(), "Waiting for next run");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {
                info!(trigger = %trigger.name, "Trigger fired");
                if let Err(e) = (trigger.handler)().await {
                    warn!(trigger = %trigger.name, error = %e, "Trigger run failed");
                }
                trigger.times.write().await.last_run = Some(next_run);
                previous = Some(next_run);
            }
        }
    }

    debug!(trigger = %trigger.name, "Trigger task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::FixedClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_trigger(expression: &str, counter: Arc<AtomicUsize>) -> Trigger {
        Trigger::new(
            "counter",
            CronSchedule::parse(expression).unwrap(),
            "Counts runs",
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 31, 1, 59, 30).unwrap(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_next_minute() {
        let counter = Arc::new(AtomicUsize::new(0));
        let clock = clock();
        let scheduler = Scheduler::new(vec![counting_trigger("* * * * *", counter.clone())], clock.clone());

        scheduler.start().await.unwrap();
        let info = scheduler.triggers().await;
        assert_eq!(
            info[0].next_run,
            Some(Utc.with_ymd_and_hms(2025, 1, 31, 2, 0, 0).unwrap())
        );
        assert!(info[0].last_run.is_none());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let info = scheduler.triggers().await;
        assert_eq!(
            info[0].last_run,
            Some(Utc.with_ymd_and_hms(2025, 1, 31, 2, 0, 0).unwrap())
        );
        assert_eq!(
            info[0].next_run,
            Some(Utc.with_ymd_and_hms(2025, 1, 31, 2, 1, 0).unwrap())
        );

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_runs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(vec![counting_trigger("0 2 * * *", counter.clone())], clock());

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(scheduler.triggers().await[0].next_run.is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(vec![counting_trigger("0 2 * * *", counter)], clock());

        scheduler.stop().await;
        scheduler.start().await.unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_trigger_info() {
        let scheduler = Scheduler::new(
            vec![counting_trigger("0 * * * *", Arc::new(AtomicUsize::new(0)))],
            clock(),
        );
        let info = scheduler.triggers().await;
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].name, "counter");
        assert_eq!(info[0].expression, "0 * * * *");
        assert_eq!(info[0].description, "Counts runs");
        assert!(info[0].next_run.is_none());
    }
}
