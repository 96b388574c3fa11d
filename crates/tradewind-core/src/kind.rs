//! Closed error-kind taxonomy shared by every control-plane subsystem.

use serde::{Deserialize, Serialize};

/// Stable classification of every failure the control plane can report.
///
/// Kinds are the contract between subsystems: the CLI maps them to exit
/// codes, the scheduler consults [`ErrorKind::is_recoverable`] before
/// retrying, and structured DR/integrity reports persist them verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A caller-supplied argument or precondition was invalid.
    InvalidArgument,
    /// The referenced entity does not exist.
    NotFound,
    /// The entity already exists.
    AlreadyExists,
    /// Another mutating operation holds the facade lock.
    OperationBusy,
    /// A rollback run is already in flight.
    RollbackInProgress,
    /// The requested rollback target is already the active version.
    AlreadyActive,

    /// A stored blob does not match its recorded SHA-256.
    ChecksumMismatch,
    /// AEAD decryption or tag verification failed.
    DecryptFailed,
    /// Decompression or archive unpacking failed.
    DecompressFailed,
    /// A persisted record failed structural validation.
    MetadataInvalid,

    /// A single external call exceeded its timeout.
    Timeout,
    /// The overall operation deadline elapsed.
    DeadlineExceeded,
    /// The operation observed a cancellation signal and stopped.
    Cancelled,
    /// A cancelled operation did not finish within the graceful budget.
    CancelForceAbandoned,
    /// A service failed to start or become healthy.
    ServiceStartFailed,
    /// Post-restart validation of a service failed.
    ServiceValidationFailed,

    /// Fewer than the configured minimum copies were written.
    InsufficientCopies,
    /// A storage location could not be reached.
    LocationUnavailable,

    /// The process supervisor returned an error.
    SupervisorError,
    /// A health probe could not be reached.
    ProbeUnreachable,
    /// The object store returned an error.
    ObjectStoreError,

    /// Anything that escaped the taxonomy above.
    Internal,
}

impl ErrorKind {
    /// Whether a failure of this kind may be retried without operator
    /// involvement.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::LocationUnavailable
                | ErrorKind::ProbeUnreachable
                | ErrorKind::ObjectStoreError
                | ErrorKind::SupervisorError
        )
    }

    /// Stable string form used in reports and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::OperationBusy => "operation-busy",
            ErrorKind::RollbackInProgress => "rollback-in-progress",
            ErrorKind::AlreadyActive => "already-active",
            ErrorKind::ChecksumMismatch => "checksum-mismatch",
            ErrorKind::DecryptFailed => "decrypt-failed",
            ErrorKind::DecompressFailed => "decompress-failed",
            ErrorKind::MetadataInvalid => "metadata-invalid",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DeadlineExceeded => "deadline-exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::CancelForceAbandoned => "cancel-force-abandoned",
            ErrorKind::ServiceStartFailed => "service-start-failed",
            ErrorKind::ServiceValidationFailed => "service-validation-failed",
            ErrorKind::InsufficientCopies => "insufficient-copies",
            ErrorKind::LocationUnavailable => "location-unavailable",
            ErrorKind::SupervisorError => "supervisor-error",
            ErrorKind::ProbeUnreachable => "probe-unreachable",
            ErrorKind::ObjectStoreError => "object-store-error",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every subsystem error enum so callers can classify a
/// failure without matching on the concrete type.
pub trait Kinded {
    /// The taxonomy kind this error maps onto.
    fn kind(&self) -> ErrorKind;

    /// Whether the failure is retryable without operator involvement.
    fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }
}
