//! # Freshness Probe
//!
//! Checks how long ago the transform last completed, based on the timestamp in
//! the summary file. Data is fresh when that age is within the tolerance.
//!
//! The probe only reports. It never starts a sync or a transform.

use crate::transform::{read_summary, SummaryError};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::events::{CoreEvent, EventBus, HealthEvent};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessReport {
    pub fresh: bool,
    pub last_transform_at: Option<DateTime<Utc>>,
    pub age_secs: Option<i64>,
    pub tolerance_secs: u64,
    pub checked_at: DateTime<Utc>,
    pub message: String,
}

pub struct FreshnessProbe {
    summary_path: PathBuf,
    tolerance: Duration,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
}

impl FreshnessProbe {
    pub fn new(
        summary_path: impl Into<PathBuf>,
        tolerance: Duration,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            summary_path: summary_path.into(),
            tolerance,
            clock,
            event_bus,
        }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    #[instrument(skip(self), fields(summary = %self.summary_path.display()))]
    pub async fn check(&self) -> FreshnessReport {
        let checked_at = self.clock.now();
        let tolerance_secs = self.tolerance.as_secs();

        let last_transform_at = read_summary(&self.summary_path)
            .await
            .and_then(|report| report.parsed_timestamp());

        let report = match last_transform_at {
            Ok(at) => {
                let age_secs = (checked_at - at).num_seconds();
                let fresh = age_secs <= tolerance_secs as i64;
                let message = if fresh {
                    format!(
                        "Data is fresh: last transform {} ago",
                        format_age(age_secs)
                    )
                } else {
                    format!(
                        "Data is stale: last transform {} ago, tolerance {}",
                        format_age(age_secs),
                        format_age(tolerance_secs as i64)
                    )
                };
                FreshnessReport {
                    fresh,
                    last_transform_at: Some(at),
                    age_secs: Some(age_secs),
                    tolerance_secs,
                    checked_at,
                    message,
                }
            }
            Err(e) => FreshnessReport {
                fresh: false,
                last_transform_at: None,
                age_secs: None,
                tolerance_secs,
                checked_at,
                message: unavailable_message(&e),
            },
        };

        if report.fresh {
            info!(age_secs = ?report.age_secs, "{}", report.message);
        } else {
            warn!(age_secs = ?report.age_secs, tolerance_secs, "{}", report.message);
        }

        self.event_bus
            .emit(CoreEvent::Health(HealthEvent::FreshnessChecked {
                fresh: report.fresh,
                age_secs: report.age_secs,
                tolerance_secs,
                message: report.message.clone(),
            }))
            .ok();

        report
    }
}

fn unavailable_message(error: &SummaryError) -> String {
    match error {
        SummaryError::Missing { path } => {
            format!("No transform has completed yet: {} not found", path.display())
        }
        other => format!("Cannot determine data age: {}", other),
    }
}

fn format_age(secs: i64) -> String {
    let secs = secs.max(0);
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}
