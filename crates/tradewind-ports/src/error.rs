//! Error types for port operations.

use thiserror::Error;
use tradewind_core::{ErrorKind, Kinded};

/// Failures crossing a port boundary.
///
/// No exceptions cross the boundary: every adapter converts its native
/// failure into one of these structured variants.
#[derive(Error, Debug)]
pub enum PortError {
    #[error("supervisor error: {0}")]
    Supervisor(String),

    #[error("process not found: {0}")]
    ProcessNotFound(String),

    #[error("probe unreachable for {service}: {reason}")]
    ProbeUnreachable {
        /// Service the probe targeted.
        service: String,
        /// Transport-level reason.
        reason: String,
    },

    #[error("probe for {0} did not answer within its timeout")]
    ProbeTimeout(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("object store error: {0}")]
    Store(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("authentication tag mismatch")]
    AuthenticationFailed,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Kinded for PortError {
    fn kind(&self) -> ErrorKind {
        match self {
            PortError::Supervisor(_) => ErrorKind::SupervisorError,
            PortError::ProcessNotFound(_) => ErrorKind::NotFound,
            PortError::ProbeUnreachable { .. } => ErrorKind::ProbeUnreachable,
            PortError::ProbeTimeout(_) => ErrorKind::Timeout,
            PortError::ObjectNotFound(_) => ErrorKind::NotFound,
            PortError::Store(_) => ErrorKind::ObjectStoreError,
            PortError::EncryptionFailed(_) => ErrorKind::Internal,
            PortError::AuthenticationFailed => ErrorKind::DecryptFailed,
            PortError::InvalidKey(_) => ErrorKind::InvalidArgument,
            PortError::Cancelled => ErrorKind::Cancelled,
            PortError::Io(_) => ErrorKind::ObjectStoreError,
        }
    }
}

/// Result type alias for port operations.
pub type PortResult<T> = std::result::Result<T, PortError>;
