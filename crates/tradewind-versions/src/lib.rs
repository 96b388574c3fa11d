//! # Tradewind Versions
//!
//! Immutable deployment version records and the store that persists them.
//!
//! A `Version` is the unit of rollback: a snapshot of every service's
//! artifact and configuration fingerprints, the system dependency set, and
//! an executable rollback plan. Records are written one JSON file each,
//! atomically, and only the status field ever changes after creation.
//!
//! The store enforces the single-active invariant, refuses to open a
//! corrupt store (more than one active record), and applies count-based
//! retention by archiving the oldest non-active versions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compare;
pub mod error;
pub mod model;
pub mod plan;
pub mod store;

pub use compare::{DependencyDelta, ServiceChange, ServiceHistoryEntry, VersionDiff};
pub use error::{Result, VersionError};
pub use model::{
    ServiceRecord, SystemDependencies, Version, VersionMetadata, VersionStatus,
};
pub use plan::{Instruction, RollbackAction, RollbackPlan, ALL_SERVICES};
pub use store::{NewVersion, RetentionPolicy, VersionStore};
