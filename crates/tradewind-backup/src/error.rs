//! Error types for the backup subsystem.

use thiserror::Error;
use tradewind_core::{ErrorKind, Kinded};
use tradewind_ports::PortError;

/// Failures raised by backup operations.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("backup not found: {0}")]
    NotFound(String),

    #[error("checksum mismatch for {backup_id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Backup whose blob failed verification.
        backup_id: String,
        /// Hash recorded at creation.
        expected: String,
        /// Hash of the bytes actually retrieved.
        actual: String,
    },

    #[error("decryption failed: authentication tag rejected")]
    DecryptFailed,

    #[error("decompression failed: {0}")]
    DecompressFailed(String),

    #[error("invalid backup metadata: {0}")]
    MetadataInvalid(String),

    #[error("only {copies} of {min_copies} required copies written")]
    InsufficientCopies {
        /// Copies successfully written.
        copies: usize,
        /// Configured minimum.
        min_copies: usize,
    },

    #[error("storage location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Kinded for BackupError {
    fn kind(&self) -> ErrorKind {
        match self {
            BackupError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BackupError::NotFound(_) => ErrorKind::NotFound,
            BackupError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            BackupError::DecryptFailed => ErrorKind::DecryptFailed,
            BackupError::DecompressFailed(_) => ErrorKind::DecompressFailed,
            BackupError::MetadataInvalid(_) => ErrorKind::MetadataInvalid,
            BackupError::InsufficientCopies { .. } => ErrorKind::InsufficientCopies,
            BackupError::LocationUnavailable(_) => ErrorKind::LocationUnavailable,
            BackupError::Cancelled => ErrorKind::Cancelled,
            BackupError::Timeout(_) => ErrorKind::Timeout,
            BackupError::Port(inner) => inner.kind(),
            BackupError::Io(_) => ErrorKind::Internal,
            BackupError::Serialization(_) => ErrorKind::MetadataInvalid,
        }
    }
}

/// Result type alias for backup operations.
pub type Result<T> = std::result::Result<T, BackupError>;
