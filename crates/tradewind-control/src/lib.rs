//! # Tradewind Control
//!
//! Ties the control plane together:
//!
//! - `config`: closed configuration schema, loaded from TOML plus
//!   environment overrides and validated before anything is built
//! - `plane`: the composition root (every component constructed exactly
//!   once, ports passed in explicitly) and the orchestrator facade with
//!   its single mutating-operation lock
//! - `jobs`: the scheduled-job adapters binding the three scheduler
//!   tracks to facade operations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod jobs;
pub mod plane;

pub use config::{
    BackupOptions, ControlPlaneConfig, DrTestOptions, IntegrityOptions, LocationConfig,
    RollbackOptions, StorageOptions, VersionStoreOptions,
};
pub use error::{ControlError, Result};
pub use plane::{ControlPlane, CreateVersionRequest, PortSet, SystemStatus};
