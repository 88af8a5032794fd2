//! # Event Bus System
//!
//! Diagnostic events for the sync engine, published over
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: one enum per concern (connection, sync, job, health)
//! - **EventBus**: central broadcast channel for publishing events
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ SFTP adapter ├──────────────>│           │
//! └──────────────┘               │           │     subscribe    ┌────────────┐
//! ┌──────────────┐     emit      │ EventBus  ├─────────────────>│ Dashboard  │
//! │ Sync engine  ├──────────────>│ (broadcast│                  └────────────┘
//! └──────────────┘               │  channel) │     subscribe    ┌────────────┐
//! ┌──────────────┐     emit      │           ├─────────────────>│ Log relay  │
//! │ Orchestrator ├──────────────>│           │                  └────────────┘
//! └──────────────┘               └───────────┘
//! ```
//!
//! Emission is best-effort: publishers call `.ok()` on the result so a bus
//! without subscribers never fails an operation.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::DirectoryStarted {
//!         directory: "Artikel".to_string(),
//!         remote_path: "/Artikel".to_string(),
//!     }))
//!     .ok();
//!
//! assert!(subscriber.try_recv().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, error::SendError};

pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Remote endpoint session lifecycle
    Connection(ConnectionEvent),
    /// Directory and file level sync progress
    Sync(SyncEvent),
    /// Job and step transitions
    Job(JobEvent),
    /// Freshness probe results
    Health(HealthEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Connection(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Job(e) => e.description(),
            CoreEvent::Health(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Connection(ConnectionEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::FileFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::DirectoryFailed { .. }) => EventSeverity::Error,
            CoreEvent::Job(JobEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Health(HealthEvent::FreshnessChecked { fresh: false, .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Job(JobEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::DirectoryCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Health(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Connection Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ConnectionEvent {
    Connecting {
        endpoint: String,
        attempt: u32,
    },
    Connected {
        endpoint: String,
        elapsed_ms: u64,
    },
    /// Proactive disconnect + reconnect between batches
    Refreshed {
        endpoint: String,
        batches_done: usize,
    },
    Disconnected {
        endpoint: String,
    },
    Failed {
        endpoint: String,
        message: String,
    },
}

impl ConnectionEvent {
    fn description(&self) -> &str {
        match self {
            ConnectionEvent::Connecting { .. } => "Connecting to remote endpoint",
            ConnectionEvent::Connected { .. } => "Connected to remote endpoint",
            ConnectionEvent::Refreshed { .. } => "Connection refreshed",
            ConnectionEvent::Disconnected { .. } => "Disconnected from remote endpoint",
            ConnectionEvent::Failed { .. } => "Connection failed",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    PassStarted {
        endpoint: String,
    },
    DirectoryStarted {
        directory: String,
        remote_path: String,
    },
    /// Listing finished and batches are about to run
    DirectoryListed {
        directory: String,
        files: usize,
        batches: usize,
    },
    FileFetched {
        directory: String,
        file: String,
        bytes: u64,
        reason: String,
    },
    FileFailed {
        directory: String,
        file: String,
        attempts: u32,
        message: String,
    },
    DirectoryCompleted {
        directory: String,
        downloaded: usize,
        skipped: usize,
        errors: usize,
        duration_ms: u64,
    },
    DirectoryFailed {
        directory: String,
        message: String,
    },
    PassCompleted {
        downloaded: usize,
        skipped: usize,
        errors: usize,
        duration_ms: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::PassStarted { .. } => "Sync pass started",
            SyncEvent::DirectoryStarted { .. } => "Directory sync started",
            SyncEvent::DirectoryListed { .. } => "Remote directory listed",
            SyncEvent::FileFetched { .. } => "File fetched",
            SyncEvent::FileFailed { .. } => "File failed after retries",
            SyncEvent::DirectoryCompleted { .. } => "Directory sync completed",
            SyncEvent::DirectoryFailed { .. } => "Directory sync failed",
            SyncEvent::PassCompleted { .. } => "Sync pass completed",
        }
    }
}

// ============================================================================
// Job Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum JobEvent {
    Started {
        job_id: String,
        job_type: String,
    },
    StepStarted {
        job_id: String,
        step: String,
    },
    StepCompleted {
        job_id: String,
        step: String,
        duration_ms: u64,
    },
    StepFailed {
        job_id: String,
        step: String,
        message: String,
    },
    Completed {
        job_id: String,
        duration_ms: u64,
    },
    Failed {
        job_id: String,
        step: Option<String>,
        message: String,
    },
    /// A trigger fired while another job was active
    Skipped {
        trigger: String,
        active_job_id: String,
    },
}

impl JobEvent {
    fn description(&self) -> &str {
        match self {
            JobEvent::Started { .. } => "Job started",
            JobEvent::StepStarted { .. } => "Job step started",
            JobEvent::StepCompleted { .. } => "Job step completed",
            JobEvent::StepFailed { .. } => "Job step failed",
            JobEvent::Completed { .. } => "Job completed",
            JobEvent::Failed { .. } => "Job failed",
            JobEvent::Skipped { .. } => "Job skipped, another job is active",
        }
    }
}

// ============================================================================
// Health Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum HealthEvent {
    FreshnessChecked {
        fresh: bool,
        age_secs: Option<i64>,
        tolerance_secs: u64,
        message: String,
    },
}

impl HealthEvent {
    fn description(&self) -> &str {
        match self {
            HealthEvent::FreshnessChecked { fresh: true, .. } => "Data is fresh",
            HealthEvent::FreshnessChecked { fresh: false, .. } => "Data is stale",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
