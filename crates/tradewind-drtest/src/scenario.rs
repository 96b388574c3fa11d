//! DR scenario model.

use serde::{Deserialize, Serialize};

use crate::error::{DrTestError, Result};

/// The failure a scenario injects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Graceful stop of the target services.
    StopService,
    /// Abrupt termination of the target processes.
    KillProcess,
    /// Network partition between the targets and their peers. Simulated.
    DisconnectNetwork,
    /// Disk exhaustion on the target hosts. Simulated.
    FillDisk,
    /// Memory exhaustion on the target hosts. Simulated.
    ExhaustMemory,
    /// Operator-supplied script.
    CustomScript {
        /// Script path or inline command.
        script: String,
    },
}

impl FailureKind {
    /// Whether this kind can be injected through the supervisor port, or
    /// is only ever simulated by the harness.
    pub fn is_process_failure(&self) -> bool {
        matches!(self, FailureKind::StopService | FailureKind::KillProcess)
    }
}

/// Acceptable data loss for a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataLossClass {
    /// No data loss tolerated.
    None,
    /// Up to seconds of data loss tolerated.
    Seconds,
    /// Up to minutes of data loss tolerated.
    Minutes,
}

/// What a passing recovery looks like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    /// Recovery must finish within this budget.
    pub max_recovery_time_ms: u64,
    /// Acceptable data-loss class.
    pub data_loss: DataLossClass,
    /// Required service availability after recovery, 0-100.
    pub min_availability_pct: f64,
    /// Whether trading services must be serving again.
    pub trading_must_resume: bool,
}

/// Which probe reading a validation step asserts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeMetric {
    /// Health flag, read as 1.0 (healthy) or 0.0.
    Healthy,
    /// Probe round-trip latency in milliseconds.
    LatencyMs,
}

/// Comparison applied to the probed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Assertion {
    /// actual == expected.
    Equals(f64),
    /// actual != expected.
    NotEquals(f64),
    /// actual >= bound.
    AtLeast(f64),
    /// actual <= bound.
    AtMost(f64),
    /// |actual - center| <= tolerance.
    WithinRange {
        /// Expected center value.
        center: f64,
        /// Allowed absolute deviation.
        tolerance: f64,
    },
}

impl Assertion {
    /// Evaluates the assertion against a probed value.
    pub fn evaluate(&self, actual: f64) -> bool {
        match *self {
            Assertion::Equals(expected) => (actual - expected).abs() < f64::EPSILON,
            Assertion::NotEquals(expected) => (actual - expected).abs() >= f64::EPSILON,
            Assertion::AtLeast(bound) => actual >= bound,
            Assertion::AtMost(bound) => actual <= bound,
            Assertion::WithinRange { center, tolerance } => (actual - center).abs() <= tolerance,
        }
    }

    /// Human-readable form for reports.
    pub fn describe(&self) -> String {
        match *self {
            Assertion::Equals(v) => format!("== {v}"),
            Assertion::NotEquals(v) => format!("!= {v}"),
            Assertion::AtLeast(v) => format!(">= {v}"),
            Assertion::AtMost(v) => format!("<= {v}"),
            Assertion::WithinRange { center, tolerance } => {
                format!("within {center} ± {tolerance}")
            }
        }
    }
}

/// One post-recovery assertion against a live probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationStep {
    /// Step name for reports.
    pub name: String,
    /// Service to probe.
    pub service: String,
    /// Probe reading asserted on.
    pub metric: ProbeMetric,
    /// Comparison applied.
    pub assertion: Assertion,
}

/// A declared disaster-recovery scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Stable scenario id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Failure to inject.
    pub failure: FailureKind,
    /// Services the failure targets.
    pub targets: Vec<String>,
    /// How long the failure persists before recovery starts.
    pub failure_duration_ms: u64,
    /// Pass criteria.
    pub expected: ExpectedOutcome,
    /// Post-recovery assertions.
    pub validations: Vec<ValidationStep>,
    /// Version to recover to; `None` exercises the currently active one.
    pub recovery_version: Option<String>,
}

impl Scenario {
    /// Structural validation applied before execution.
    pub fn validate(&self) -> Result<()> {
        let reject = |reason: &str| {
            Err(DrTestError::InvalidScenario {
                name: self.name.clone(),
                reason: reason.to_string(),
            })
        };
        if self.id.is_empty() {
            return reject("empty scenario id");
        }
        if self.targets.is_empty() && self.failure.is_process_failure() {
            return reject("process failure with no targets");
        }
        if self.expected.max_recovery_time_ms == 0 {
            return reject("max recovery time must be positive");
        }
        if !(0.0..=100.0).contains(&self.expected.min_availability_pct) {
            return reject("availability percentage must be 0-100");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertions() {
        assert!(Assertion::Equals(1.0).evaluate(1.0));
        assert!(!Assertion::Equals(1.0).evaluate(0.0));
        assert!(Assertion::NotEquals(1.0).evaluate(0.5));
        assert!(Assertion::AtLeast(10.0).evaluate(10.0));
        assert!(!Assertion::AtLeast(10.0).evaluate(9.9));
        assert!(Assertion::AtMost(100.0).evaluate(30.0));
        assert!(Assertion::WithinRange {
            center: 50.0,
            tolerance: 5.0
        }
        .evaluate(54.0));
        assert!(!Assertion::WithinRange {
            center: 50.0,
            tolerance: 5.0
        }
        .evaluate(56.0));
    }

    fn scenario() -> Scenario {
        Scenario {
            id: "stop-gateway".to_string(),
            name: "Stop order gateway".to_string(),
            failure: FailureKind::StopService,
            targets: vec!["order-gateway".to_string()],
            failure_duration_ms: 5_000,
            expected: ExpectedOutcome {
                max_recovery_time_ms: 30_000,
                data_loss: DataLossClass::None,
                min_availability_pct: 100.0,
                trading_must_resume: true,
            },
            validations: vec![],
            recovery_version: None,
        }
    }

    #[test]
    fn scenario_validation() {
        scenario().validate().unwrap();

        let mut s = scenario();
        s.targets.clear();
        assert!(s.validate().is_err());

        let mut s = scenario();
        s.expected.max_recovery_time_ms = 0;
        assert!(s.validate().is_err());

        let mut s = scenario();
        s.expected.min_availability_pct = 120.0;
        assert!(s.validate().is_err());

        // Simulated failures need no explicit targets.
        let mut s = scenario();
        s.failure = FailureKind::FillDisk;
        s.targets.clear();
        s.validate().unwrap();
    }
}
