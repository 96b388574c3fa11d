//! Serialized DR test execution.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use tradewind_events::{ControlEvent, EventBus};
use tradewind_ports::{HealthProbe, ProcessStatus, Supervisor};
use tradewind_rollback::RollbackExecutor;
use tradewind_versions::VersionStore;

use crate::error::{DrTestError, Result};
use crate::report::{self, ReportFormat};
use crate::scenario::{FailureKind, ProbeMetric, Scenario};

/// Lifecycle of one DR test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Created, not yet started.
    Pending,
    /// Scenarios are executing.
    Running,
    /// All scenarios ran and passed.
    Completed,
    /// At least one scenario failed.
    Failed,
    /// Execution was cancelled mid-run.
    Cancelled,
}

/// Per-scenario verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    /// Every criterion held.
    Passed,
    /// A criterion was violated.
    Failed,
    /// The scenario was not executed.
    Skipped,
}

/// Severity of a collected issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Recovery objective violated.
    Critical,
    /// A validation failed.
    Major,
    /// Degraded but within objectives.
    Minor,
}

/// One problem observed while scoring a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Severity class.
    pub severity: IssueSeverity,
    /// What was observed.
    pub description: String,
}

/// One evaluated validation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Step name.
    pub step: String,
    /// Service probed.
    pub service: String,
    /// Whether the assertion held.
    pub passed: bool,
    /// Assertion in human-readable form.
    pub expected: String,
    /// Value actually probed.
    pub actual: f64,
}

/// Result of one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Scenario id.
    pub scenario_id: String,
    /// Scenario name.
    pub scenario_name: String,
    /// Verdict.
    pub status: ScenarioStatus,
    /// Recovery budget from the scenario.
    pub expected_recovery_ms: u64,
    /// Observed recovery time, when recovery ran.
    pub actual_recovery_ms: Option<u64>,
    /// Evaluated validation steps.
    pub validations: Vec<ValidationResult>,
    /// Collected issues.
    pub issues: Vec<Issue>,
}

/// Aggregate metrics over one execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestMetrics {
    /// Scenario count.
    pub total: usize,
    /// Scenarios that passed.
    pub passed: usize,
    /// Scenarios that failed.
    pub failed: usize,
    /// Scenarios that were skipped.
    pub skipped: usize,
    /// Wall-clock duration of the whole execution.
    pub total_duration_ms: u64,
    /// Mean observed recovery time across executed scenarios.
    pub avg_recovery_ms: Option<u64>,
}

/// One DR test execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestExecution {
    /// Execution id.
    pub id: String,
    /// Start instant.
    pub started_at: DateTime<Utc>,
    /// Completion instant, once terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// Per-scenario results.
    pub results: Vec<TestResult>,
    /// Aggregate metrics.
    pub metrics: TestMetrics,
}

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct DrTestConfig {
    /// Simulate failure injection instead of driving the supervisor.
    pub dry_run: bool,
    /// Directory reports are written into.
    pub report_dir: PathBuf,
    /// Formats to emit.
    pub report_formats: Vec<ReportFormat>,
    /// Bounded execution history length.
    pub history_limit: usize,
}

impl Default for DrTestConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            report_dir: PathBuf::from("dr-reports"),
            report_formats: vec![ReportFormat::Json],
            history_limit: 12,
        }
    }
}

/// Drives DR scenarios end to end, one execution at a time.
pub struct DrTestHarness {
    executor: Arc<RollbackExecutor>,
    versions: Arc<VersionStore>,
    supervisor: Arc<dyn Supervisor>,
    probe: Arc<dyn HealthProbe>,
    bus: EventBus,
    config: DrTestConfig,
    running: tokio::sync::Mutex<()>,
    history: RwLock<VecDeque<TestExecution>>,
}

impl DrTestHarness {
    /// Creates a harness.
    pub fn new(
        executor: Arc<RollbackExecutor>,
        versions: Arc<VersionStore>,
        supervisor: Arc<dyn Supervisor>,
        probe: Arc<dyn HealthProbe>,
        bus: EventBus,
        config: DrTestConfig,
    ) -> Self {
        Self {
            executor,
            versions,
            supervisor,
            probe,
            bus,
            config,
            running: tokio::sync::Mutex::new(()),
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// Runs `scenarios` as one execution. At most one execution may be
    /// running; a second call fails fast.
    pub async fn run(
        &self,
        scenarios: &[Scenario],
        cancel: &CancellationToken,
    ) -> Result<TestExecution> {
        let _serialized = self
            .running
            .try_lock()
            .map_err(|_| DrTestError::ExecutionInProgress)?;

        for scenario in scenarios {
            scenario.validate()?;
        }

        let mut execution = TestExecution {
            id: format!("dr-{}", Uuid::new_v4()),
            started_at: Utc::now(),
            completed_at: None,
            status: ExecutionStatus::Running,
            results: Vec::new(),
            metrics: TestMetrics::default(),
        };
        let started = std::time::Instant::now();

        info!(
            execution_id = %execution.id,
            scenarios = scenarios.len(),
            dry_run = self.config.dry_run,
            "DR test execution starting"
        );
        self.bus.publish(ControlEvent::DrTestStarted {
            execution_id: execution.id.clone(),
            scenarios: scenarios.len(),
        });

        let mut cancelled = false;
        for scenario in scenarios {
            if cancel.is_cancelled() {
                cancelled = true;
                execution.results.push(TestResult {
                    scenario_id: scenario.id.clone(),
                    scenario_name: scenario.name.clone(),
                    status: ScenarioStatus::Skipped,
                    expected_recovery_ms: scenario.expected.max_recovery_time_ms,
                    actual_recovery_ms: None,
                    validations: Vec::new(),
                    issues: vec![Issue {
                        severity: IssueSeverity::Minor,
                        description: "execution cancelled before this scenario".to_string(),
                    }],
                });
                continue;
            }
            let result = self.run_scenario(scenario, cancel).await;
            execution.results.push(result);
        }

        execution.metrics = compute_metrics(&execution.results, started.elapsed());
        execution.completed_at = Some(Utc::now());
        execution.status = if cancelled {
            ExecutionStatus::Cancelled
        } else if execution.metrics.failed > 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };

        self.bus.publish(ControlEvent::DrTestCompleted {
            execution_id: execution.id.clone(),
            passed: execution.metrics.passed,
            failed: execution.metrics.failed,
        });

        if let Err(e) = report::write_reports(
            &execution,
            &self.config.report_dir,
            &self.config.report_formats,
        )
        .await
        {
            warn!(error = %e, "failed to write DR reports");
        }

        let mut history = self.history.write().await;
        history.push_back(execution.clone());
        while history.len() > self.config.history_limit {
            history.pop_front();
        }

        info!(
            execution_id = %execution.id,
            status = ?execution.status,
            passed = execution.metrics.passed,
            failed = execution.metrics.failed,
            "DR test execution finished"
        );
        Ok(execution)
    }

    /// Past executions, oldest first.
    pub async fn history(&self) -> Vec<TestExecution> {
        self.history.read().await.iter().cloned().collect()
    }

    /// The most recent execution, if any.
    pub async fn latest(&self) -> Option<TestExecution> {
        self.history.read().await.back().cloned()
    }

    /// Fetches one past execution by id.
    pub async fn get(&self, execution_id: &str) -> Result<TestExecution> {
        self.history
            .read()
            .await
            .iter()
            .find(|e| e.id == execution_id)
            .cloned()
            .ok_or_else(|| DrTestError::NotFound(execution_id.to_string()))
    }

    async fn run_scenario(&self, scenario: &Scenario, cancel: &CancellationToken) -> TestResult {
        let mut result = TestResult {
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            status: ScenarioStatus::Failed,
            expected_recovery_ms: scenario.expected.max_recovery_time_ms,
            actual_recovery_ms: None,
            validations: Vec::new(),
            issues: Vec::new(),
        };

        info!(scenario = %scenario.name, "injecting failure");
        if let Err(e) = self.inject_failure(scenario, cancel).await {
            result.issues.push(Issue {
                severity: IssueSeverity::Critical,
                description: format!("failure injection failed: {e}"),
            });
            result.status = ScenarioStatus::Skipped;
            return result;
        }

        // Let the failure persist for its declared duration.
        let hold = Duration::from_millis(scenario.failure_duration_ms);
        tokio::select! {
            _ = cancel.cancelled() => {
                result.status = ScenarioStatus::Skipped;
                return result;
            }
            _ = tokio::time::sleep(hold) => {}
        }

        // Drive recovery through the executor.
        let recovery_target = match &scenario.recovery_version {
            Some(id) => id.clone(),
            None => match self.versions.active().await {
                Some(active) => active.id,
                None => {
                    result.issues.push(Issue {
                        severity: IssueSeverity::Critical,
                        description: "no active version to recover to".to_string(),
                    });
                    return result;
                }
            },
        };

        let recovery = self.executor.exercise_recovery(&recovery_target).await;
        let recovered = match recovery {
            Ok(rollback) => {
                result.actual_recovery_ms = Some(rollback.duration_ms);
                if !rollback.succeeded() {
                    result.issues.push(Issue {
                        severity: IssueSeverity::Critical,
                        description: format!(
                            "recovery run ended {:?}: {}",
                            rollback.state,
                            rollback.message.unwrap_or_default()
                        ),
                    });
                }
                rollback.state == tradewind_rollback::RunState::Completed
            }
            Err(e) => {
                result.issues.push(Issue {
                    severity: IssueSeverity::Critical,
                    description: format!("recovery could not start: {e}"),
                });
                false
            }
        };

        if let Some(actual) = result.actual_recovery_ms {
            if actual > scenario.expected.max_recovery_time_ms {
                result.issues.push(Issue {
                    severity: IssueSeverity::Critical,
                    description: format!(
                        "recovery took {actual}ms, budget was {}ms",
                        scenario.expected.max_recovery_time_ms
                    ),
                });
            }
        }

        // Evaluate every validation step against live probes.
        for step in &scenario.validations {
            let actual = match self.probe.check(&step.service).await {
                Ok(status) => match step.metric {
                    ProbeMetric::Healthy => {
                        if status.healthy {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    ProbeMetric::LatencyMs => status.latency_ms as f64,
                },
                Err(_) => f64::NAN,
            };
            let passed = !actual.is_nan() && step.assertion.evaluate(actual);
            if !passed {
                result.issues.push(Issue {
                    severity: IssueSeverity::Major,
                    description: format!(
                        "validation {:?} failed: {} expected {}, got {actual}",
                        step.name,
                        step.service,
                        step.assertion.describe()
                    ),
                });
            }
            result.validations.push(ValidationResult {
                step: step.name.clone(),
                service: step.service.clone(),
                passed,
                expected: step.assertion.describe(),
                actual,
            });
        }

        // Availability and trading-resumption checks.
        match self.supervisor.list_processes().await {
            Ok(processes) if !processes.is_empty() => {
                let running = processes
                    .iter()
                    .filter(|p| p.status == ProcessStatus::Running)
                    .count();
                let availability = running as f64 / processes.len() as f64 * 100.0;
                if availability < scenario.expected.min_availability_pct {
                    result.issues.push(Issue {
                        severity: IssueSeverity::Critical,
                        description: format!(
                            "availability {availability:.1}% below required {:.1}%",
                            scenario.expected.min_availability_pct
                        ),
                    });
                }
                if scenario.expected.trading_must_resume {
                    for target in &scenario.targets {
                        let ok = processes
                            .iter()
                            .any(|p| &p.name == target && p.status == ProcessStatus::Running);
                        if !ok {
                            result.issues.push(Issue {
                                severity: IssueSeverity::Critical,
                                description: format!("trading service {target} did not resume"),
                            });
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(e) => result.issues.push(Issue {
                severity: IssueSeverity::Major,
                description: format!("could not list processes for scoring: {e}"),
            }),
        }

        let recovery_within_budget = result
            .actual_recovery_ms
            .map(|a| a <= scenario.expected.max_recovery_time_ms)
            .unwrap_or(false);
        let validations_ok = result.validations.iter().all(|v| v.passed);
        let no_critical = !result
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Critical);

        result.status = if recovered && recovery_within_budget && validations_ok && no_critical {
            ScenarioStatus::Passed
        } else {
            ScenarioStatus::Failed
        };

        // Teardown: make sure the targets are back regardless of verdict.
        for target in &scenario.targets {
            if let Err(e) = self.supervisor.start_process(target).await {
                warn!(service = %target, error = %e, "teardown restart failed");
            }
        }

        result
    }

    async fn inject_failure(
        &self,
        scenario: &Scenario,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        if self.config.dry_run || !scenario.failure.is_process_failure() {
            // Non-process failures have no port to travel through; their
            // timing is simulated and recovery is still driven for real.
            info!(
                scenario = %scenario.name,
                failure = ?scenario.failure,
                "failure injection simulated"
            );
            return Ok(());
        }

        for target in &scenario.targets {
            match scenario.failure {
                FailureKind::StopService | FailureKind::KillProcess => {
                    self.supervisor.stop_process(target).await?;
                }
                _ => unreachable!("non-process failures are simulated"),
            }
        }
        Ok(())
    }
}

fn compute_metrics(results: &[TestResult], elapsed: Duration) -> TestMetrics {
    let recoveries: Vec<u64> = results.iter().filter_map(|r| r.actual_recovery_ms).collect();
    TestMetrics {
        total: results.len(),
        passed: results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Passed)
            .count(),
        failed: results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Failed)
            .count(),
        skipped: results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Skipped)
            .count(),
        total_duration_ms: elapsed.as_millis() as u64,
        avg_recovery_ms: if recoveries.is_empty() {
            None
        } else {
            Some(recoveries.iter().sum::<u64>() / recoveries.len() as u64)
        },
    }
}
