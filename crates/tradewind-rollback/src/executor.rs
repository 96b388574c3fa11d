//! Rollback executor: runs planned groups under a hard deadline.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use tradewind_core::{
    retry_with, with_graceful_budget, ErrorKind, GracefulOutcome, Kinded, RetryError, RetryPolicy,
};
use tradewind_events::{ControlEvent, EventBus};
use tradewind_ports::{HealthProbe, Supervisor};
use tradewind_versions::{Instruction, RollbackAction, Version, VersionStatus, VersionStore};

use crate::actions::{ActionContext, InstructionHandler, StepError};
use crate::error::{Result, RollbackError};
use crate::planner::{BlastRadius, ExecutionPlan, RollbackPlanner};
use crate::progress::ProgressTracker;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hard wall-clock budget for the whole run.
    pub overall_deadline: Duration,
    /// How long a cancelled run may take to wind down before it is
    /// abandoned.
    pub graceful_cancel_budget: Duration,
    /// Fallback per-step timeout for instructions that declare none.
    pub default_step_timeout: Duration,
    /// Schedule instructions into parallel groups; off means strictly
    /// sequential execution.
    pub parallel_groups_enabled: bool,
    /// Run the full deployment validator after a successful rollback.
    pub auto_validate: bool,
    /// Per-step retry for recoverable failures.
    pub step_retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            overall_deadline: Duration::from_secs(120),
            graceful_cancel_budget: Duration::from_secs(10),
            default_step_timeout: Duration::from_secs(30),
            parallel_groups_enabled: true,
            auto_validate: true,
            step_retry: RetryPolicy::fixed(2, Duration::from_secs(1)),
        }
    }
}

/// Executor state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No run in flight.
    Idle,
    /// Building the execution plan.
    Planning,
    /// Executing groups.
    Running,
    /// Last run finished successfully.
    Completed,
    /// Last run failed.
    Failed,
    /// Last run was aborted by the operator.
    Aborted,
}

impl RunState {
    fn accepts_new_run(self) -> bool {
        !matches!(self, RunState::Planning | RunState::Running)
    }
}

/// Outcome of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The instruction completed.
    Succeeded,
    /// The instruction failed after retries.
    Failed,
    /// The instruction was cancelled before or during dispatch.
    Cancelled,
}

/// Record of one executed (or cancelled) instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step index in the raw plan.
    pub step: usize,
    /// Action name.
    pub action: String,
    /// Instruction target.
    pub target: String,
    /// Outcome.
    pub status: StepStatus,
    /// Attempts made (0 when never dispatched).
    pub attempts: u32,
    /// Failure kind, when failed.
    pub kind: Option<ErrorKind>,
    /// Failure description, when failed.
    pub error: Option<String>,
    /// Step duration.
    pub duration_ms: u64,
}

/// Post-rollback health of one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceValidation {
    /// Service name.
    pub name: String,
    /// Whether the probe answered healthy.
    pub healthy: bool,
    /// Probe detail, when any.
    pub detail: Option<String>,
}

/// Full-deployment validation attached to a successful rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Per-service results.
    pub services: Vec<ServiceValidation>,
    /// Whether every service validated healthy.
    pub all_healthy: bool,
}

/// Final report of one rollback run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    /// Run id.
    pub run_id: String,
    /// Target version id.
    pub target_version: String,
    /// Terminal state: completed, failed or aborted.
    pub state: RunState,
    /// Failure kind, when not completed.
    pub kind: Option<ErrorKind>,
    /// Failure description, when not completed.
    pub message: Option<String>,
    /// Per-step outcomes in dispatch order.
    pub steps: Vec<StepResult>,
    /// Groups fully processed.
    pub completed_groups: usize,
    /// Groups in the plan.
    pub total_groups: usize,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Total wall-clock duration.
    pub duration_ms: u64,
    /// Post-run validation, when auto-validation ran.
    pub validation: Option<ValidationSummary>,
}

impl RollbackResult {
    /// Whether the run completed and the target version is active.
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Completed
    }
}

enum RunFailure {
    Step {
        kind: ErrorKind,
        message: String,
    },
    Cancelled,
}

/// Executes rollback plans group by group under the overall deadline.
///
/// Exactly one run may be in flight; a second `rollback` call while one is
/// running fails fast with `RollbackInProgress`.
pub struct RollbackExecutor {
    versions: Arc<VersionStore>,
    supervisor: Arc<dyn Supervisor>,
    probe: Arc<dyn HealthProbe>,
    handler: Arc<dyn InstructionHandler>,
    bus: EventBus,
    config: ExecutorConfig,
    state: parking_lot::Mutex<RunState>,
    current_cancel: parking_lot::Mutex<Option<CancellationToken>>,
    abort_requested: AtomicBool,
}

impl RollbackExecutor {
    /// Creates an executor.
    pub fn new(
        versions: Arc<VersionStore>,
        supervisor: Arc<dyn Supervisor>,
        probe: Arc<dyn HealthProbe>,
        handler: Arc<dyn InstructionHandler>,
        bus: EventBus,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            versions,
            supervisor,
            probe,
            handler,
            bus,
            config,
            state: parking_lot::Mutex::new(RunState::Idle),
            current_cancel: parking_lot::Mutex::new(None),
            abort_requested: AtomicBool::new(false),
        }
    }

    /// Current state of the executor.
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Dry-run: builds and returns the execution plan for `target_id`
    /// without touching any persisted state.
    pub async fn analyze(&self, target_id: &str) -> Result<ExecutionPlan> {
        let target = self.versions.get(target_id).await?;
        self.build_plan(&target)
    }

    /// What rolling back to `target_id` would transitively affect.
    pub async fn blast_radius(&self, target_id: &str) -> Result<BlastRadius> {
        let target = self.versions.get(target_id).await?;
        Ok(RollbackPlanner::blast_radius(
            &target.rollback_plan.instructions,
            &target.services,
        ))
    }

    /// Requests cancellation of the in-flight run. The run winds down
    /// cooperatively and ends in the aborted state after a best-effort
    /// restart of all services.
    pub fn abort(&self) -> Result<()> {
        let guard = self.current_cancel.lock();
        match guard.as_ref() {
            Some(token) => {
                self.abort_requested.store(true, Ordering::SeqCst);
                token.cancel();
                info!("rollback abort requested");
                Ok(())
            }
            None => Err(RollbackError::NoActiveRun),
        }
    }

    fn build_plan(&self, target: &Version) -> Result<ExecutionPlan> {
        if self.config.parallel_groups_enabled {
            RollbackPlanner::plan(&target.rollback_plan.instructions, &target.services)
        } else {
            RollbackPlanner::sequential(&target.rollback_plan.instructions)
        }
    }

    /// Rolls the fleet back to `target_id`.
    ///
    /// Hard precondition failures (unknown target, already-active target,
    /// overlapping run, unplannable instruction list) return `Err`.
    /// Execution outcomes, including failed and aborted runs, return
    /// `Ok(RollbackResult)` with the terminal state and failure kind.
    pub async fn rollback(&self, target_id: &str) -> Result<RollbackResult> {
        self.launch(target_id, false).await
    }

    /// Exercises the recovery path of `target_id` even when it is the
    /// currently active version.
    ///
    /// This is the DR harness entry point: the same plan, deadline and
    /// cancellation machinery as [`RollbackExecutor::rollback`], but an
    /// already-active target is executed (restart path) instead of being
    /// rejected, and activation is skipped when nothing needs swapping.
    pub async fn exercise_recovery(&self, target_id: &str) -> Result<RollbackResult> {
        self.launch(target_id, true).await
    }

    async fn launch(&self, target_id: &str, allow_active: bool) -> Result<RollbackResult> {
        {
            let mut state = self.state.lock();
            if !state.accepts_new_run() {
                return Err(RollbackError::RollbackInProgress);
            }
            *state = RunState::Planning;
        }
        self.abort_requested.store(false, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        *self.current_cancel.lock() = Some(cancel.clone());

        let outcome = self.run(target_id, allow_active, cancel).await;

        *self.current_cancel.lock() = None;
        match &outcome {
            Ok(result) => *self.state.lock() = result.state,
            Err(_) => *self.state.lock() = RunState::Idle,
        }
        outcome
    }

    async fn run(
        &self,
        target_id: &str,
        allow_active: bool,
        cancel: CancellationToken,
    ) -> Result<RollbackResult> {
        let target = self.versions.get(target_id).await?;
        let target_is_active = self
            .versions
            .active()
            .await
            .is_some_and(|active| active.id == target_id);
        if target_is_active && !allow_active {
            return Err(RollbackError::AlreadyActive(target_id.to_string()));
        }
        if target.status == VersionStatus::Archived {
            return Err(RollbackError::InvalidPlan(format!(
                "version {target_id} is archived and not a rollback target"
            )));
        }

        let plan = self.build_plan(&target)?;
        let run_id = format!("rb-{}", Uuid::new_v4());
        let started_at = Utc::now();
        let started = std::time::Instant::now();

        info!(
            run_id = %run_id,
            target = %target.id,
            groups = plan.groups.len(),
            estimated_secs = plan.estimated_duration_secs,
            "rollback starting"
        );
        self.bus.publish(ControlEvent::RollbackStarted {
            run_id: run_id.clone(),
            target_version: target.id.clone(),
        });
        *self.state.lock() = RunState::Running;

        let total_groups = plan.groups.len();
        let execution = self.execute_plan(&plan, &target, &run_id, &cancel);
        tokio::pin!(execution);

        // The deadline dominates per-step timeouts: when it fires, the
        // run is cancelled and given the graceful budget to wind down.
        let mut deadline_fired = false;
        let mut force_abandoned = false;
        let (steps, completed_groups, failure) = tokio::select! {
            outcome = &mut execution => outcome,
            _ = tokio::time::sleep(self.config.overall_deadline) => {
                deadline_fired = true;
                cancel.cancel();
                match with_graceful_budget(
                    "rollback",
                    self.config.graceful_cancel_budget,
                    &mut execution,
                )
                .await
                {
                    GracefulOutcome::Completed(outcome) => outcome,
                    GracefulOutcome::ForceAbandoned => {
                        force_abandoned = true;
                        (Vec::new(), 0, Some(RunFailure::Cancelled))
                    }
                }
            }
        };

        let aborted = self.abort_requested.load(Ordering::SeqCst);
        let mut result = RollbackResult {
            run_id: run_id.clone(),
            target_version: target.id.clone(),
            state: RunState::Failed,
            kind: None,
            message: None,
            steps,
            completed_groups,
            total_groups,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            validation: None,
        };

        if force_abandoned {
            result.kind = Some(ErrorKind::CancelForceAbandoned);
            result.message = Some("cancelled run exceeded its graceful budget".to_string());
        } else if aborted {
            result.state = RunState::Aborted;
            result.kind = Some(ErrorKind::Cancelled);
            result.message = Some("rollback aborted by operator".to_string());
        } else if deadline_fired {
            result.kind = Some(ErrorKind::DeadlineExceeded);
            result.message = Some(format!(
                "rollback exceeded its {}s deadline",
                self.config.overall_deadline.as_secs()
            ));
        } else {
            match failure {
                Some(RunFailure::Step { kind, message }) => {
                    result.kind = Some(kind);
                    result.message = Some(message);
                }
                Some(RunFailure::Cancelled) => {
                    result.kind = Some(ErrorKind::Cancelled);
                    result.message = Some("rollback cancelled".to_string());
                }
                None if target_is_active => {
                    // Recovery exercise of the active version: nothing to
                    // swap.
                    result.state = RunState::Completed;
                }
                None => {
                    // Execution finished cleanly: make the target active.
                    match self.versions.activate(&target.id).await {
                        Ok(previous) => {
                            self.bus.publish(ControlEvent::VersionActivated {
                                version_id: target.id.clone(),
                                previous,
                            });
                            result.state = RunState::Completed;
                        }
                        Err(e) => {
                            result.kind = Some(e.kind());
                            result.message = Some(format!("activation failed: {e}"));
                        }
                    }
                }
            }
        }

        if result.state == RunState::Completed && self.config.auto_validate {
            result.validation = Some(self.validate_deployment(&target).await);
        }

        if result.state == RunState::Aborted {
            // Best effort: bring some functionality back before reporting.
            if let Err(e) = self.supervisor.start_all().await {
                warn!(error = %e, "post-abort restart failed");
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        match result.state {
            RunState::Completed => {
                info!(run_id = %run_id, duration_ms = result.duration_ms, "rollback completed");
                self.bus.publish(ControlEvent::RollbackCompleted {
                    run_id: run_id.clone(),
                    target_version: target.id.clone(),
                    duration_ms: result.duration_ms,
                });
            }
            _ => {
                let kind = result.kind.unwrap_or(ErrorKind::Internal);
                error!(
                    run_id = %run_id,
                    kind = %kind,
                    message = result.message.as_deref().unwrap_or(""),
                    "rollback did not complete"
                );
                self.bus.publish(ControlEvent::RollbackFailed {
                    run_id: run_id.clone(),
                    kind,
                    message: result.message.clone().unwrap_or_default(),
                });
            }
        }

        Ok(result)
    }

    async fn execute_plan(
        &self,
        plan: &ExecutionPlan,
        target: &Version,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> (Vec<StepResult>, usize, Option<RunFailure>) {
        let mut steps = Vec::new();
        let mut tracker =
            ProgressTracker::new(self.bus.clone(), run_id, plan.groups.len());
        let mut failure = None;

        for (index, group) in plan.groups.iter().enumerate() {
            // No new group is dispatched after the cancel signal.
            if cancel.is_cancelled() {
                failure = Some(RunFailure::Cancelled);
                break;
            }

            let group_started = std::time::Instant::now();
            let group_cancel = cancel.child_token();
            let futures: Vec<_> = group
                .instructions
                .iter()
                .map(|instruction| self.run_step(instruction, target, &group_cancel))
                .collect();
            let results = futures::future::join_all(futures).await;

            let abort_failure = results.iter().find_map(|r| {
                if r.status == StepStatus::Failed {
                    let instruction = group
                        .instructions
                        .iter()
                        .find(|i| i.step == r.step)
                        .expect("result maps to a group instruction");
                    if instruction.abort_on_failure {
                        return Some(RunFailure::Step {
                            kind: r.kind.unwrap_or(ErrorKind::Internal),
                            message: r
                                .error
                                .clone()
                                .unwrap_or_else(|| "step failed".to_string()),
                        });
                    }
                }
                None
            });
            let group_cancelled =
                results.iter().any(|r| r.status == StepStatus::Cancelled);
            steps.extend(results);

            let next = plan.groups.get(index + 1).and_then(|g| {
                g.instructions
                    .first()
                    .map(|i| (i.action.as_str(), i.target.clone()))
            });
            tracker.group_completed(
                group_started.elapsed(),
                next.as_ref().map(|(a, t)| (*a, t.as_str())),
            );

            if let Some(f) = abort_failure {
                failure = Some(f);
                break;
            }
            if group_cancelled && cancel.is_cancelled() {
                failure = Some(RunFailure::Cancelled);
                break;
            }
        }

        (steps, tracker.completed_groups(), failure)
    }

    async fn run_step(
        &self,
        instruction: &Instruction,
        target: &Version,
        group_cancel: &CancellationToken,
    ) -> StepResult {
        let started = std::time::Instant::now();
        let mut result = StepResult {
            step: instruction.step,
            action: instruction.action.as_str().to_string(),
            target: instruction.target.clone(),
            status: StepStatus::Cancelled,
            attempts: 0,
            kind: None,
            error: None,
            duration_ms: 0,
        };

        if group_cancel.is_cancelled() {
            return result;
        }

        let timeout = if instruction.timeout_secs == 0 {
            self.config.default_step_timeout
        } else {
            Duration::from_secs(instruction.timeout_secs)
        };

        let attempts = AtomicU32::new(0);
        let outcome = retry_with(
            &self.config.step_retry,
            group_cancel,
            |e: &StepError| e.kind.is_recoverable(),
            |attempt| {
                attempts.store(attempt, Ordering::SeqCst);
                let ctx = ActionContext {
                    instruction,
                    plan: &target.rollback_plan,
                    cancel: group_cancel,
                };
                async move {
                    match tokio::time::timeout(timeout, self.handler.execute(ctx)).await {
                        Ok(step_outcome) => step_outcome,
                        Err(_) => Err(StepError::new(
                            timeout_kind(instruction.action),
                            format!("step timed out after {}s", timeout.as_secs()),
                        )),
                    }
                }
            },
        )
        .await;

        result.attempts = attempts.load(Ordering::SeqCst);
        result.duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                result.status = StepStatus::Succeeded;
            }
            Err(RetryError::Cancelled) => {
                result.status = StepStatus::Cancelled;
            }
            Err(retry_err) => {
                let step_error = retry_err
                    .into_inner()
                    .unwrap_or_else(|| StepError::new(ErrorKind::Cancelled, "cancelled"));
                if step_error.kind == ErrorKind::Cancelled {
                    result.status = StepStatus::Cancelled;
                } else {
                    result.status = StepStatus::Failed;
                    result.kind = Some(step_error.kind);
                    result.error = Some(step_error.message.clone());
                    if instruction.abort_on_failure {
                        warn!(
                            step = instruction.step,
                            action = %instruction.action,
                            target = %instruction.target,
                            error = %step_error,
                            "abort-on-failure step failed, cancelling group"
                        );
                        group_cancel.cancel();
                    } else {
                        warn!(
                            step = instruction.step,
                            action = %instruction.action,
                            target = %instruction.target,
                            error = %step_error,
                            "step failed, continuing"
                        );
                    }
                }
            }
        }
        result
    }

    async fn validate_deployment(&self, target: &Version) -> ValidationSummary {
        let mut services = Vec::with_capacity(target.services.len());
        for service in &target.services {
            let (healthy, detail) = match self.probe.check(&service.name).await {
                Ok(status) => (status.healthy, status.detail),
                Err(e) => (false, Some(e.to_string())),
            };
            services.push(ServiceValidation {
                name: service.name.clone(),
                healthy,
                detail,
            });
        }
        let all_healthy = services.iter().all(|s| s.healthy);
        ValidationSummary {
            services,
            all_healthy,
        }
    }
}

fn timeout_kind(action: RollbackAction) -> ErrorKind {
    match action {
        RollbackAction::StartService => ErrorKind::ServiceStartFailed,
        RollbackAction::ValidateService => ErrorKind::ServiceValidationFailed,
        _ => ErrorKind::Timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionConfig, PortActionHandler};
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use tradewind_ports::{SimProbe, SimSupervisor};
    use tradewind_versions::{
        NewVersion, RetentionPolicy, RollbackPlan, ServiceRecord, SystemDependencies,
        VersionMetadata,
    };

    struct Fixture {
        executor: Arc<RollbackExecutor>,
        versions: Arc<VersionStore>,
        supervisor: Arc<SimSupervisor>,
        v_old: Version,
        v_new: Version,
        _dirs: Vec<tempfile::TempDir>,
    }

    fn service(name: &str, deps: &[&str]) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            version: "1.0".to_string(),
            artifact_fingerprint: format!("sha256:{name}"),
            config_fingerprint: format!("sha256:{name}-cfg"),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            health_endpoint: Some(format!("http://localhost/{name}")),
            startup_timeout_secs: 30,
        }
    }

    async fn seed_snapshots(root: &Path, services: &[ServiceRecord]) -> RollbackPlan {
        let config_snapshot = root.join("config");
        tokio::fs::create_dir_all(&config_snapshot).await.unwrap();
        tokio::fs::write(config_snapshot.join("app.toml"), b"mode = \"restored\"")
            .await
            .unwrap();

        let mut artifact_snapshots = BTreeMap::new();
        for s in services {
            let dir = root.join("artifacts").join(&s.name);
            tokio::fs::create_dir_all(&dir).await.unwrap();
            tokio::fs::write(dir.join("binary"), s.name.as_bytes())
                .await
                .unwrap();
            artifact_snapshots.insert(s.name.clone(), dir);
        }

        RollbackPlan::standard(
            services,
            Some(config_snapshot),
            artifact_snapshots,
            Some(root.to_path_buf()),
        )
        .unwrap()
    }

    async fn fixture(launch_delay: Duration, config: ExecutorConfig) -> Fixture {
        let store_dir = tempfile::tempdir().unwrap();
        let snap_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();

        let services = vec![service("a", &[]), service("b", &["a"])];
        let versions = Arc::new(
            VersionStore::open(store_dir.path(), 10, RetentionPolicy::NeverDelete)
                .await
                .unwrap(),
        );

        let plan_old = seed_snapshots(&snap_dir.path().join("old"), &services).await;
        let v_old = versions
            .create(NewVersion {
                version: "1.0.0".to_string(),
                services: services.clone(),
                metadata: VersionMetadata::default(),
                dependencies: SystemDependencies::default(),
                rollback_plan: plan_old,
            })
            .await
            .unwrap();

        let plan_new = seed_snapshots(&snap_dir.path().join("new"), &services).await;
        let v_new = versions
            .create(NewVersion {
                version: "1.1.0".to_string(),
                services: services.clone(),
                metadata: VersionMetadata::default(),
                dependencies: SystemDependencies::default(),
                rollback_plan: plan_new,
            })
            .await
            .unwrap();
        versions.activate(&v_new.id).await.unwrap();

        let supervisor =
            Arc::new(SimSupervisor::new(["a", "b"]).with_launch_delay(launch_delay));
        supervisor.start_all().await.unwrap();
        let probe = Arc::new(SimProbe::attached(supervisor.clone()));

        let handler = Arc::new(PortActionHandler::new(
            supervisor.clone(),
            probe.clone(),
            ActionConfig {
                graceful_shutdown: Duration::from_secs(2),
                probe_poll_interval: Duration::from_millis(100),
                install_root: work_dir.path().join("services"),
                config_root: work_dir.path().join("config"),
            },
        ));

        let executor = Arc::new(RollbackExecutor::new(
            versions.clone(),
            supervisor.clone(),
            probe,
            handler,
            EventBus::new(256),
            config,
        ));

        Fixture {
            executor,
            versions,
            supervisor,
            v_old,
            v_new,
            _dirs: vec![store_dir, snap_dir, work_dir],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clean_rollback_activates_target() {
        let fx = fixture(Duration::from_millis(50), ExecutorConfig::default()).await;

        let result = fx.executor.rollback(&fx.v_old.id).await.unwrap();
        assert_eq!(result.state, RunState::Completed);
        assert!(result.succeeded());
        assert_eq!(result.completed_groups, result.total_groups);
        assert!(result
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Succeeded));

        // Version store swapped active.
        assert_eq!(fx.versions.active().await.unwrap().id, fx.v_old.id);
        assert_eq!(
            fx.versions.get(&fx.v_new.id).await.unwrap().status,
            VersionStatus::Inactive
        );

        // Auto-validation ran and everything is healthy.
        let validation = result.validation.unwrap();
        assert!(validation.all_healthy);
        assert_eq!(fx.executor.state(), RunState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_exceeded_fails_without_activation() {
        let config = ExecutorConfig {
            overall_deadline: Duration::from_secs(2),
            ..Default::default()
        };
        // Services take far longer to launch than the deadline allows.
        let fx = fixture(Duration::from_secs(600), config).await;

        let result = fx.executor.rollback(&fx.v_old.id).await.unwrap();
        assert_eq!(result.state, RunState::Failed);
        assert_eq!(result.kind, Some(ErrorKind::DeadlineExceeded));

        // No instruction was dispatched after the deadline: every recorded
        // step either finished or was cancelled, and the version store is
        // untouched.
        assert_eq!(fx.versions.active().await.unwrap().id, fx.v_new.id);
        assert!(result.steps.iter().all(|s| s.status != StepStatus::Failed));
        assert!(result
            .steps
            .iter()
            .any(|s| s.status == StepStatus::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_to_active_version_rejected() {
        let fx = fixture(Duration::from_millis(50), ExecutorConfig::default()).await;
        let err = fx.executor.rollback(&fx.v_new.id).await.unwrap_err();
        assert!(matches!(err, RollbackError::AlreadyActive(_)));
        assert_eq!(fx.executor.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_rollback_rejected() {
        let fx = fixture(Duration::from_secs(3), ExecutorConfig::default()).await;

        let executor = fx.executor.clone();
        let target = fx.v_old.id.clone();
        let first = tokio::spawn(async move { executor.rollback(&target).await });

        // Wait until the first run has claimed the executor.
        while fx.executor.state() == RunState::Idle {
            tokio::task::yield_now().await;
        }

        let err = fx.executor.rollback(&fx.v_new.id).await.unwrap_err();
        assert!(matches!(err, RollbackError::RollbackInProgress));

        // The first run is unaffected and completes normally.
        let result = first.await.unwrap().unwrap();
        assert_eq!(result.state, RunState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_cancels_and_restarts_services() {
        let fx = fixture(Duration::from_secs(600), ExecutorConfig::default()).await;

        let executor = fx.executor.clone();
        let target = fx.v_old.id.clone();
        let run = tokio::spawn(async move { executor.rollback(&target).await });

        while fx.executor.state() != RunState::Running {
            tokio::task::yield_now().await;
        }
        // Give the run a moment to get into the start group, then abort.
        tokio::time::sleep(Duration::from_millis(500)).await;
        fx.executor.abort().unwrap();

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.state, RunState::Aborted);
        assert_eq!(result.kind, Some(ErrorKind::Cancelled));

        // Best-effort restart was issued for the fleet.
        let processes = fx.supervisor.list_processes().await.unwrap();
        assert!(processes.iter().all(|p| p.pid.is_some()));

        // Version store untouched.
        assert_eq!(fx.versions.active().await.unwrap().id, fx.v_new.id);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_without_run_errors() {
        let fx = fixture(Duration::from_millis(50), ExecutorConfig::default()).await;
        assert!(matches!(
            fx.executor.abort(),
            Err(RollbackError::NoActiveRun)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn analyze_is_pure() {
        let fx = fixture(Duration::from_millis(50), ExecutorConfig::default()).await;

        let plan = fx.executor.analyze(&fx.v_old.id).await.unwrap();
        assert!(!plan.groups.is_empty());
        assert!(plan.estimated_duration_secs <= plan.sequential_duration_secs);

        // Nothing changed: same active version, executor still idle.
        assert_eq!(fx.versions.active().await.unwrap().id, fx.v_new.id);
        assert_eq!(fx.executor.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_aborts_run() {
        let fx = fixture(Duration::from_millis(50), ExecutorConfig::default()).await;
        fx.supervisor.inject_start_failure("a");

        let result = fx.executor.rollback(&fx.v_old.id).await.unwrap();
        assert_eq!(result.state, RunState::Failed);
        assert_eq!(result.kind, Some(ErrorKind::ServiceStartFailed));

        // Later groups never dispatched: no validate step for b succeeded.
        assert!(!result
            .steps
            .iter()
            .any(|s| s.action == "validate-service" && s.target == "b"));
        assert_eq!(fx.versions.active().await.unwrap().id, fx.v_new.id);
    }

    #[tokio::test(start_paused = true)]
    async fn non_abort_step_failure_continues() {
        let fx = fixture(Duration::from_millis(50), ExecutorConfig::default()).await;

        // A plan with one known-bad restore step that is not allowed to
        // abort the run: no snapshot exists for "ghost".
        let services = vec![service("a", &[])];
        let snap = tempfile::tempdir().unwrap();
        let plan = seed_snapshots(snap.path(), &services).await;
        let instructions = vec![
            Instruction::new(0, RollbackAction::StopService, "all", 30, true),
            Instruction::new(1, RollbackAction::RestoreFiles, "a", 60, true),
            Instruction::new(2, RollbackAction::RestoreFiles, "ghost", 60, false),
            Instruction::new(3, RollbackAction::StartService, "a", 30, true),
            Instruction::new(4, RollbackAction::ValidateService, "a", 30, true),
        ];
        let custom = fx
            .versions
            .create(NewVersion {
                version: "1.0.1".to_string(),
                services,
                metadata: VersionMetadata::default(),
                dependencies: SystemDependencies::default(),
                rollback_plan: RollbackPlan {
                    instructions,
                    config_snapshot: plan.config_snapshot.clone(),
                    artifact_snapshots: plan.artifact_snapshots.clone(),
                    snapshot_root: None,
                },
            })
            .await
            .unwrap();

        let result = fx.executor.rollback(&custom.id).await.unwrap();

        // The bad step failed, was logged, and the run still completed.
        assert_eq!(result.state, RunState::Completed);
        let ghost = result
            .steps
            .iter()
            .find(|s| s.target == "ghost")
            .expect("ghost step recorded");
        assert_eq!(ghost.status, StepStatus::Failed);
        assert!(result
            .steps
            .iter()
            .any(|s| s.action == "validate-service" && s.status == StepStatus::Succeeded));
        assert_eq!(fx.versions.active().await.unwrap().id, custom.id);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_exercise_accepts_active_version() {
        let fx = fixture(Duration::from_millis(50), ExecutorConfig::default()).await;

        let result = fx.executor.exercise_recovery(&fx.v_new.id).await.unwrap();
        assert_eq!(result.state, RunState::Completed);
        // Active version unchanged: the restart path does not swap.
        assert_eq!(fx.versions.active().await.unwrap().id, fx.v_new.id);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_mode_runs_one_step_per_group() {
        let config = ExecutorConfig {
            parallel_groups_enabled: false,
            ..Default::default()
        };
        let fx = fixture(Duration::from_millis(50), config).await;

        let result = fx.executor.rollback(&fx.v_old.id).await.unwrap();
        assert_eq!(result.state, RunState::Completed);
        assert_eq!(result.total_groups, result.steps.len());
    }
}
