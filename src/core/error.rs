use crate::cas::CasError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum MapperError {
    #[error("Illegal access: {0}")]
    IllegalAccess(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Property '{0}' not found on entity '{1}'")]
    PropertyNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Stale object: {0}")]
    StaleObject(String),

    #[error(transparent)]
    CasRejected(#[from] CasError),

    #[error("{0}")]
    Validation(String),

    #[error("Not enough replicas available for consistency level {level} (required {required}, alive {alive})")]
    Unavailable {
        level: String,
        required: usize,
        alive: usize,
    },

    #[error("Invalid consistency level: {0}")]
    InvalidConsistency(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Persistence context is closed")]
    ContextClosed,

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl MapperError {
    /// Invariant violations and staleness are never worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Store(_) | Self::ExecutionError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;

impl<T> From<std::sync::PoisonError<T>> for MapperError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for MapperError {
    fn from(err: serde_json::Error) -> Self {
        Self::ExecutionError(format!("json: {}", err))
    }
}

impl From<tokio::task::JoinError> for MapperError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::ExecutionError(format!("task failed: {}", err))
    }
}
