use crate::store::StoreError;

/// Crate-wide error type, one variant per error kind in the orchestrator's
/// contract. Internal glue code that never crosses the public API surface
/// may still use `anyhow`; this enum is what callers of `Orchestrator`,
/// `Scheduler`, and the Metadata Store actually match on.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition for job {job_id}: {reason}")]
    InvalidState { job_id: String, reason: String },

    #[error("job {0} is already queued")]
    AlreadyQueued(String),

    #[error("job {0} is not running")]
    NotRunning(String),

    #[error("cancellation requested for job {0}")]
    CancellationRequested(String),

    #[error("engine exited with status {exit_code}: {log_tail}")]
    EngineFailure { exit_code: i32, log_tail: String },

    #[error("execution cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine output error: {0}")]
    EngineOutput(#[from] crate::engine::EngineError),

    #[error("job {0} recovered after restart")]
    RecoveredAfterRestart(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
