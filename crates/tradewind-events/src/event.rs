//! The control-plane event vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tradewind_core::ErrorKind;

/// Everything the control plane announces on the unified bus.
///
/// The enum is closed on purpose: consumers match exhaustively and a new
/// kind of announcement is a deliberate API change, not a new magic string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlEvent {
    /// A deployment produced a new version record.
    VersionCreated {
        /// Version record id.
        version_id: String,
        /// Human version string.
        version: String,
    },
    /// A version became the active one.
    VersionActivated {
        /// Newly active version id.
        version_id: String,
        /// Previously active version id, if any.
        previous: Option<String>,
    },
    /// A version was archived.
    VersionArchived {
        /// Archived version id.
        version_id: String,
    },

    /// A backup run started.
    BackupStarted {
        /// Backup id.
        backup_id: String,
    },
    /// A backup was encoded and replicated.
    BackupCompleted {
        /// Backup id.
        backup_id: String,
        /// Number of successful copies.
        copies: usize,
        /// Whether copies fell below the configured minimum.
        insufficient: bool,
    },
    /// A backup run failed.
    BackupFailed {
        /// Backup id when one was assigned before the failure.
        backup_id: Option<String>,
        /// Failure classification.
        kind: ErrorKind,
        /// Human-readable message.
        message: String,
    },
    /// A backup was restored to disk.
    BackupRestored {
        /// Backup id.
        backup_id: String,
    },

    /// An integrity run started.
    IntegrityRunStarted {
        /// Run id.
        run_id: String,
    },
    /// An integrity run finished.
    IntegrityRunCompleted {
        /// Run id.
        run_id: String,
        /// Test cases that passed.
        passed: usize,
        /// Test cases that failed.
        failed: usize,
    },

    /// A scheduler track fired its job.
    ScheduleFired {
        /// Track name (`daily-backup`, `weekly-integrity`, `monthly-dr-test`).
        track: String,
        /// The occurrence this firing covers.
        occurrence: DateTime<Utc>,
    },
    /// A scheduled job failed after exhausting its retries.
    ScheduleFailed {
        /// Track name.
        track: String,
        /// Failure classification.
        kind: ErrorKind,
        /// Human-readable message.
        message: String,
    },

    /// A rollback run entered planning.
    RollbackStarted {
        /// Run id.
        run_id: String,
        /// Target version id.
        target_version: String,
    },
    /// Progress after a parallel group completed.
    RollbackProgress {
        /// Run id.
        run_id: String,
        /// Groups completed so far.
        completed_groups: usize,
        /// Total groups in the plan.
        total_groups: usize,
        /// Action of the next group, if any.
        current_action: Option<String>,
        /// Target of the next group, if any.
        target: Option<String>,
        /// Estimated remaining time from observed group durations.
        eta_ms: Option<u64>,
    },
    /// A rollback completed and the target version is active.
    RollbackCompleted {
        /// Run id.
        run_id: String,
        /// Activated version id.
        target_version: String,
        /// Total wall-clock duration.
        duration_ms: u64,
    },
    /// A rollback run failed or was aborted.
    RollbackFailed {
        /// Run id.
        run_id: String,
        /// Failure classification (`kAborted` surfaces as `Cancelled`).
        kind: ErrorKind,
        /// Human-readable message.
        message: String,
    },

    /// Replication finished below the minimum copy count.
    ReplicationDegraded {
        /// Backup id.
        backup_id: String,
        /// Copies actually written.
        copies: usize,
        /// Configured minimum.
        min_copies: usize,
    },

    /// A DR test execution started.
    DrTestStarted {
        /// Execution id.
        execution_id: String,
        /// Number of scenarios in the execution.
        scenarios: usize,
    },
    /// A DR test execution finished.
    DrTestCompleted {
        /// Execution id.
        execution_id: String,
        /// Scenarios that passed.
        passed: usize,
        /// Scenarios that failed.
        failed: usize,
    },
}

impl ControlEvent {
    /// Short stable label for log fields and report rows.
    pub fn label(&self) -> &'static str {
        match self {
            ControlEvent::VersionCreated { .. } => "version-created",
            ControlEvent::VersionActivated { .. } => "version-activated",
            ControlEvent::VersionArchived { .. } => "version-archived",
            ControlEvent::BackupStarted { .. } => "backup-started",
            ControlEvent::BackupCompleted { .. } => "backup-completed",
            ControlEvent::BackupFailed { .. } => "backup-failed",
            ControlEvent::BackupRestored { .. } => "backup-restored",
            ControlEvent::IntegrityRunStarted { .. } => "integrity-run-started",
            ControlEvent::IntegrityRunCompleted { .. } => "integrity-run-completed",
            ControlEvent::ScheduleFired { .. } => "schedule-fired",
            ControlEvent::ScheduleFailed { .. } => "schedule-failed",
            ControlEvent::RollbackStarted { .. } => "rollback-started",
            ControlEvent::RollbackProgress { .. } => "rollback-progress",
            ControlEvent::RollbackCompleted { .. } => "rollback-completed",
            ControlEvent::RollbackFailed { .. } => "rollback-failed",
            ControlEvent::ReplicationDegraded { .. } => "replication-degraded",
            ControlEvent::DrTestStarted { .. } => "dr-test-started",
            ControlEvent::DrTestCompleted { .. } => "dr-test-completed",
        }
    }
}
