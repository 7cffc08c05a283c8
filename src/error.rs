use thiserror::Error;

/// Unified error type for the runtime (spec 7).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EcsError {
    #[error("registration error: {0}")]
    Registration(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("concurrency safety violation: {0}")]
    ConcurrencySafety(String),

    #[error("kernel contract violation: {0}")]
    KernelContract(String),

    #[error("system '{system}' failed: {message}")]
    SystemExecution { system: String, message: String },

    #[error("system '{system}' timed out after {millis}ms")]
    Timeout { system: String, millis: u64 },

    #[error("system '{system}' was cancelled")]
    Cancelled { system: String },

    #[error("plan validity error: {0}")]
    PlanValidity(String),

    #[error("entity is not alive")]
    DeadEntity,

    #[error("row {row} out of range (len {len})")]
    RowOutOfRange { row: usize, len: usize },
}

pub type EcsResult<T> = Result<T, EcsError>;
