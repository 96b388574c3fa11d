//! # Tradewind Backup
//!
//! The backup subsystem of the Tradewind control plane:
//!
//! - `codec`: archive + compress + authenticated-encrypt pipeline and its
//!   inverse, with SHA-256 blob hashing
//! - `sources`: glob-driven selection of the files a backup covers
//! - `record`: the immutable `BackupRecord` metadata
//! - `storage`: replication fan-out across prioritized locations with
//!   min/max copy enforcement, retrieval, listing and retention cleanup
//! - `scheduler`: fixed-cadence job tracks (daily backup, weekly
//!   integrity, monthly DR test)
//! - `integrity`: periodic restore-and-compare audits of stored backups

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod integrity;
pub mod record;
pub mod scheduler;
pub mod sources;
pub mod storage;

pub use codec::{BackupCodec, EncodedBackup};
pub use error::{BackupError, Result};
pub use integrity::{
    CaseFailure, IntegrityCase, IntegrityConfig, IntegrityRunReport, IntegrityTester,
};
pub use record::{BackupRecord, SourceFileRef};
pub use scheduler::{
    Cadence, JobFailure, ScheduledJob, Scheduler, SchedulerHandle, SchedulerStatistics,
    TrackConfig, TrackExecution, TrackRunStatus,
};
pub use sources::{SourceFile, SourceSelector};
pub use storage::{
    CleanupReport, LocationHandle, LocationKind, LocationListing, ReplicationOutcome,
    StorageLocation, StorageManager, StorageStatistics,
};
