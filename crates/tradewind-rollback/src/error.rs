//! Error types for rollback planning and execution.

use thiserror::Error;
use tradewind_core::{ErrorKind, Kinded};
use tradewind_ports::PortError;
use tradewind_versions::VersionError;

/// Failures raised by the planner and executor.
#[derive(Error, Debug)]
pub enum RollbackError {
    #[error("invalid rollback plan: {0}")]
    InvalidPlan(String),

    #[error("version {0} is already active")]
    AlreadyActive(String),

    #[error("a rollback is already in progress")]
    RollbackInProgress,

    #[error("no rollback is in progress")]
    NoActiveRun,

    #[error("rollback deadline of {deadline_secs}s exceeded")]
    DeadlineExceeded {
        /// Configured overall deadline.
        deadline_secs: u64,
    },

    #[error("step {step} ({action} {target}) failed: {message}")]
    StepFailed {
        /// Step index in the raw plan.
        step: usize,
        /// Action name.
        action: &'static str,
        /// Instruction target.
        target: String,
        /// Taxonomy kind of the failure.
        kind: ErrorKind,
        /// Failure description.
        message: String,
    },

    #[error("rollback aborted by operator")]
    Aborted,

    #[error("operation cancelled")]
    Cancelled,

    #[error("cancelled rollback exceeded its graceful budget")]
    CancelForceAbandoned,

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Port(#[from] PortError),
}

impl Kinded for RollbackError {
    fn kind(&self) -> ErrorKind {
        match self {
            RollbackError::InvalidPlan(_) => ErrorKind::InvalidArgument,
            RollbackError::AlreadyActive(_) => ErrorKind::AlreadyActive,
            RollbackError::RollbackInProgress => ErrorKind::RollbackInProgress,
            RollbackError::NoActiveRun => ErrorKind::NotFound,
            RollbackError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            RollbackError::StepFailed { kind, .. } => *kind,
            RollbackError::Aborted => ErrorKind::Cancelled,
            RollbackError::Cancelled => ErrorKind::Cancelled,
            RollbackError::CancelForceAbandoned => ErrorKind::CancelForceAbandoned,
            RollbackError::Version(inner) => inner.kind(),
            RollbackError::Port(inner) => inner.kind(),
        }
    }
}

/// Result type alias for rollback operations.
pub type Result<T> = std::result::Result<T, RollbackError>;
