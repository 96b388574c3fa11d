//! Error type for the orchestrator facade.

use thiserror::Error;
use tradewind_backup::BackupError;
use tradewind_core::{ErrorKind, Kinded};
use tradewind_drtest::DrTestError;
use tradewind_ports::PortError;
use tradewind_rollback::RollbackError;
use tradewind_versions::VersionError;

/// Failures surfaced by the control plane facade.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("another mutating operation is in progress")]
    OperationBusy,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Rollback(#[from] RollbackError),

    #[error(transparent)]
    DrTest(#[from] DrTestError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Kinded for ControlError {
    fn kind(&self) -> ErrorKind {
        match self {
            ControlError::OperationBusy => ErrorKind::OperationBusy,
            ControlError::Configuration(_) => ErrorKind::InvalidArgument,
            ControlError::NotFound(_) => ErrorKind::NotFound,
            ControlError::Version(inner) => inner.kind(),
            ControlError::Backup(inner) => inner.kind(),
            ControlError::Rollback(inner) => inner.kind(),
            ControlError::DrTest(inner) => inner.kind(),
            ControlError::Port(inner) => inner.kind(),
            ControlError::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias for facade operations.
pub type Result<T> = std::result::Result<T, ControlError>;
