//! # Tradewind Rollback
//!
//! Turns a version's raw instruction list into a dependency-respecting
//! schedule of parallel groups and executes it under a hard wall-clock
//! deadline:
//!
//! - `planner`: dependency DAG construction, cycle/unresolvable-dependency
//!   rejection, maximal antichain grouping with duration estimates
//! - `actions`: instruction handlers driving the supervisor, probe and
//!   filesystem ports
//! - `executor`: group-by-group execution with per-step timeout and
//!   retry, abort-on-failure semantics, cooperative cancellation,
//!   progress events and post-run activation/validation
//! - `progress`: observed-duration ETA tracking

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod actions;
pub mod error;
pub mod executor;
pub mod planner;
pub mod progress;

pub use actions::{
    ActionConfig, ActionContext, DatabaseRestore, InstructionHandler, PortActionHandler, StepError,
};
pub use error::{Result, RollbackError};
pub use executor::{
    ExecutorConfig, RollbackExecutor, RollbackResult, RunState, ServiceValidation, StepResult,
    StepStatus, ValidationSummary,
};
pub use planner::{BlastRadius, ExecutionPlan, PlannedGroup, RollbackPlanner};
pub use progress::ProgressTracker;
