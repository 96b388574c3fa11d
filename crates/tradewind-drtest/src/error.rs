//! Error types for the DR test harness.

use thiserror::Error;
use tradewind_core::{ErrorKind, Kinded};
use tradewind_ports::PortError;
use tradewind_rollback::RollbackError;

/// Failures raised by DR test execution.
#[derive(Error, Debug)]
pub enum DrTestError {
    #[error("a DR test execution is already running")]
    ExecutionInProgress,

    #[error("invalid scenario {name}: {reason}")]
    InvalidScenario {
        /// Scenario name.
        name: String,
        /// Validation failure.
        reason: String,
    },

    #[error("execution not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Rollback(#[from] RollbackError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Kinded for DrTestError {
    fn kind(&self) -> ErrorKind {
        match self {
            DrTestError::ExecutionInProgress => ErrorKind::OperationBusy,
            DrTestError::InvalidScenario { .. } => ErrorKind::InvalidArgument,
            DrTestError::NotFound(_) => ErrorKind::NotFound,
            DrTestError::Cancelled => ErrorKind::Cancelled,
            DrTestError::Rollback(inner) => inner.kind(),
            DrTestError::Port(inner) => inner.kind(),
            DrTestError::Io(_) => ErrorKind::Internal,
            DrTestError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias for DR test operations.
pub type Result<T> = std::result::Result<T, DrTestError>;
