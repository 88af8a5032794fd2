use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Job {job_id} is already running")]
    JobInProgress { job_id: String },

    #[error("Job {job_id} cannot transition from {from} to {to}")]
    InvalidStateTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("{0}")]
    Transform(String),

    #[error("Environment check failed: {}", .0.join("; "))]
    Environment(Vec<String>),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Invalid schedule '{expression}': {message}")]
    InvalidSchedule { expression: String, message: String },

    #[error(transparent)]
    Config(#[from] core_runtime::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
