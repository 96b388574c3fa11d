//! Pre-defined DR scenarios.
//!
//! Deployments usually start from these and tune targets and budgets in
//! configuration; the standard suite also runs when no scenarios are
//! configured at all, so a fresh install still rehearses recovery.

use crate::scenario::{
    Assertion, DataLossClass, ExpectedOutcome, FailureKind, ProbeMetric, Scenario, ValidationStep,
};

fn healthy_check(service: &str) -> ValidationStep {
    ValidationStep {
        name: format!("{service} healthy"),
        service: service.to_string(),
        metric: ProbeMetric::Healthy,
        assertion: Assertion::Equals(1.0),
    }
}

/// Graceful stop of one service with a tight recovery budget.
pub fn service_outage(service: &str) -> Scenario {
    Scenario {
        id: format!("service-outage-{service}"),
        name: format!("Graceful outage of {service}"),
        failure: FailureKind::StopService,
        targets: vec![service.to_string()],
        failure_duration_ms: 5_000,
        expected: ExpectedOutcome {
            max_recovery_time_ms: 30_000,
            data_loss: DataLossClass::None,
            min_availability_pct: 100.0,
            trading_must_resume: true,
        },
        validations: vec![healthy_check(service)],
        recovery_version: None,
    }
}

/// Abrupt kill of one service; tolerates seconds of data loss.
pub fn process_crash(service: &str) -> Scenario {
    Scenario {
        id: format!("process-crash-{service}"),
        name: format!("Abrupt crash of {service}"),
        failure: FailureKind::KillProcess,
        targets: vec![service.to_string()],
        failure_duration_ms: 1_000,
        expected: ExpectedOutcome {
            max_recovery_time_ms: 60_000,
            data_loss: DataLossClass::Seconds,
            min_availability_pct: 100.0,
            trading_must_resume: true,
        },
        validations: vec![healthy_check(service)],
        recovery_version: None,
    }
}

/// Simulated network partition across the fleet; recovery must restore
/// full availability but trading resumption is checked per target.
pub fn network_partition(targets: &[&str]) -> Scenario {
    Scenario {
        id: "network-partition".to_string(),
        name: "Network partition between trading services".to_string(),
        failure: FailureKind::DisconnectNetwork,
        targets: targets.iter().map(|t| t.to_string()).collect(),
        failure_duration_ms: 10_000,
        expected: ExpectedOutcome {
            max_recovery_time_ms: 120_000,
            data_loss: DataLossClass::Seconds,
            min_availability_pct: 100.0,
            trading_must_resume: true,
        },
        validations: targets.iter().map(|t| healthy_check(t)).collect(),
        recovery_version: None,
    }
}

/// The suite a fresh install rehearses when nothing is configured:
/// one outage and one crash per named service.
pub fn standard_suite(services: &[&str]) -> Vec<Scenario> {
    let mut suite = Vec::with_capacity(services.len() * 2);
    for service in services {
        suite.push(service_outage(service));
        suite.push(process_crash(service));
    }
    suite
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_validate() {
        service_outage("order-gateway").validate().unwrap();
        process_crash("risk-engine").validate().unwrap();
        network_partition(&["order-gateway", "md-feed"])
            .validate()
            .unwrap();
        for scenario in standard_suite(&["a", "b"]) {
            scenario.validate().unwrap();
        }
    }

    #[test]
    fn standard_suite_covers_outage_and_crash() {
        let suite = standard_suite(&["order-gateway"]);
        assert_eq!(suite.len(), 2);
        assert!(matches!(suite[0].failure, FailureKind::StopService));
        assert!(matches!(suite[1].failure, FailureKind::KillProcess));
    }
}
