//! Error types for the version store.

use thiserror::Error;
use tradewind_core::{ErrorKind, Kinded};

/// Failures raised by version operations.
#[derive(Error, Debug)]
pub enum VersionError {
    #[error("version not found: {0}")]
    NotFound(String),

    #[error("version already exists: {0}")]
    AlreadyExists(String),

    #[error("version {0} is already active")]
    AlreadyActive(String),

    #[error("version {0} is active and cannot be {1}")]
    ActiveProtected(String, &'static str),

    #[error("version store is corrupt: multiple active versions: {}", .active_ids.join(", "))]
    CorruptStore {
        /// Every record claiming active status.
        active_ids: Vec<String>,
    },

    #[error("invalid version record {path}: {reason}")]
    InvalidRecord {
        /// Offending file path.
        path: String,
        /// Parse or validation failure.
        reason: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Kinded for VersionError {
    fn kind(&self) -> ErrorKind {
        match self {
            VersionError::NotFound(_) => ErrorKind::NotFound,
            VersionError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            VersionError::AlreadyActive(_) => ErrorKind::AlreadyActive,
            VersionError::ActiveProtected(..) => ErrorKind::InvalidArgument,
            VersionError::CorruptStore { .. } => ErrorKind::MetadataInvalid,
            VersionError::InvalidRecord { .. } => ErrorKind::MetadataInvalid,
            VersionError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            VersionError::Io(_) => ErrorKind::Internal,
            VersionError::Serialization(_) => ErrorKind::MetadataInvalid,
        }
    }
}

/// Result type alias for version operations.
pub type Result<T> = std::result::Result<T, VersionError>;
