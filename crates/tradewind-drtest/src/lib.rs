//! # Tradewind DR Test
//!
//! Periodic disaster-recovery rehearsal: inject a declared failure, drive
//! the recovery path end to end through the rollback executor, validate
//! live probes against the scenario's expectations, and emit structured
//! pass/fail reports.
//!
//! - `scenario`: failure kinds, expected outcomes and validation
//!   assertions
//! - `harness`: serialized execution of scenario lists with bounded
//!   history
//! - `report`: JSON / HTML / CSV report rendering

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod harness;
pub mod report;
pub mod scenario;
pub mod templates;

pub use error::{DrTestError, Result};
pub use harness::{
    DrTestConfig, DrTestHarness, ExecutionStatus, Issue, IssueSeverity, ScenarioStatus,
    TestExecution, TestMetrics, TestResult, ValidationResult,
};
pub use report::ReportFormat;
pub use scenario::{
    Assertion, DataLossClass, ExpectedOutcome, FailureKind, ProbeMetric, Scenario, ValidationStep,
};
