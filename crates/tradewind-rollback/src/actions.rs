//! Instruction handlers driving the supervisor, probe and filesystem.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tradewind_core::{ErrorKind, Kinded};
use tradewind_ports::{HealthProbe, ProcessStatus, Supervisor};
use tradewind_versions::{Instruction, RollbackAction, RollbackPlan, ALL_SERVICES};

/// Failure of a single instruction, already classified.
#[derive(Debug, Clone)]
pub struct StepError {
    /// Taxonomy kind.
    pub kind: ErrorKind,
    /// Failure description.
    pub message: String,
}

impl StepError {
    /// Builds a step error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn from_kinded<E: Kinded + std::fmt::Display>(error: &E) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Everything a handler needs to execute one instruction.
pub struct ActionContext<'a> {
    /// The instruction to execute.
    pub instruction: &'a Instruction,
    /// The plan it came from, for snapshot pointers.
    pub plan: &'a RollbackPlan,
    /// Cooperative cancellation signal.
    pub cancel: &'a CancellationToken,
}

/// Executes one rollback instruction.
#[async_trait]
pub trait InstructionHandler: Send + Sync {
    /// Runs the instruction to completion or failure. The caller enforces
    /// the per-step timeout; handlers observe `ctx.cancel` cooperatively.
    async fn execute(&self, ctx: ActionContext<'_>) -> std::result::Result<(), StepError>;
}

/// Restores a database backup on behalf of a restore-database step.
///
/// Kept behind a trait so the executor stays decoupled from the backup
/// pipeline; the composition root wires the real restorer in.
#[async_trait]
pub trait DatabaseRestore: Send + Sync {
    /// Restores the backup identified by `target`.
    async fn restore(
        &self,
        target: &str,
        params: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), StepError>;
}

/// Filesystem and polling knobs for the default handler.
#[derive(Debug, Clone)]
pub struct ActionConfig {
    /// Budget for a graceful stop before the force-stop is issued.
    pub graceful_shutdown: Duration,
    /// Interval between health-probe polls while waiting for a start.
    pub probe_poll_interval: Duration,
    /// Root under which services are installed (`<root>/<service>`),
    /// used when an instruction does not carry an `install_path` param.
    pub install_root: PathBuf,
    /// Canonical configuration root restore-config writes into.
    pub config_root: PathBuf,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            graceful_shutdown: Duration::from_secs(10),
            probe_poll_interval: Duration::from_millis(500),
            install_root: PathBuf::from("services"),
            config_root: PathBuf::from("config"),
        }
    }
}

/// Default handler: drives the supervisor and probe ports and copies
/// snapshot trees on disk.
pub struct PortActionHandler {
    supervisor: Arc<dyn Supervisor>,
    probe: Arc<dyn HealthProbe>,
    config: ActionConfig,
    database: Option<Arc<dyn DatabaseRestore>>,
}

impl PortActionHandler {
    /// Creates the handler.
    pub fn new(
        supervisor: Arc<dyn Supervisor>,
        probe: Arc<dyn HealthProbe>,
        config: ActionConfig,
    ) -> Self {
        Self {
            supervisor,
            probe,
            config,
            database: None,
        }
    }

    /// Attaches a database restorer for restore-database instructions.
    pub fn with_database_restore(mut self, database: Arc<dyn DatabaseRestore>) -> Self {
        self.database = Some(database);
        self
    }

    async fn stop(&self, target: &str, cancel: &CancellationToken) -> Result<(), StepError> {
        if target == ALL_SERVICES {
            return self
                .supervisor
                .stop_all()
                .await
                .map_err(|e| StepError::from_kinded(&e));
        }

        self.supervisor
            .stop_process(target)
            .await
            .map_err(|e| StepError::from_kinded(&e))?;

        // Graceful window: wait for the process to report stopped, then
        // issue the hard stop and move on.
        let deadline = tokio::time::Instant::now() + self.config.graceful_shutdown;
        loop {
            if cancel.is_cancelled() {
                return Err(StepError::new(ErrorKind::Cancelled, "stop cancelled"));
            }
            let processes = self
                .supervisor
                .list_processes()
                .await
                .map_err(|e| StepError::from_kinded(&e))?;
            let running = processes
                .iter()
                .any(|p| p.name == target && p.status != ProcessStatus::Stopped);
            if !running {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(service = target, "graceful stop timed out, forcing");
                return self
                    .supervisor
                    .stop_process(target)
                    .await
                    .map_err(|e| StepError::from_kinded(&e));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn restore_files(
        &self,
        instruction: &Instruction,
        plan: &RollbackPlan,
    ) -> Result<(), StepError> {
        let service = instruction.target.as_str();
        let snapshot = plan.artifact_snapshots.get(service).ok_or_else(|| {
            StepError::new(
                ErrorKind::InvalidArgument,
                format!("no artifact snapshot recorded for {service}"),
            )
        })?;
        let destination = instruction
            .params
            .get("install_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.install_root.join(service));

        let copied = copy_tree(snapshot, &destination).await.map_err(|e| {
            StepError::new(
                ErrorKind::Internal,
                format!("restore of {service} failed: {e}"),
            )
        })?;
        info!(service, files = copied, dest = %destination.display(), "artifact snapshot restored");
        Ok(())
    }

    async fn restore_config(&self, plan: &RollbackPlan) -> Result<(), StepError> {
        let Some(snapshot) = &plan.config_snapshot else {
            debug!("plan carries no config snapshot, nothing to restore");
            return Ok(());
        };
        match copy_tree(snapshot, &self.config.config_root).await {
            Ok(copied) => {
                info!(files = copied, "configuration snapshot restored");
                Ok(())
            }
            // A snapshot directory that no longer exists means every file
            // is "missing from the snapshot": skipped, not an error.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("config snapshot directory missing, skipped");
                Ok(())
            }
            Err(e) => Err(StepError::new(
                ErrorKind::Internal,
                format!("config restore failed: {e}"),
            )),
        }
    }

    async fn start(&self, target: &str, cancel: &CancellationToken) -> Result<(), StepError> {
        self.supervisor.start_process(target).await.map_err(|e| {
            StepError::new(ErrorKind::ServiceStartFailed, e.to_string())
        })?;

        // Poll until healthy; the per-step timeout above us bounds this.
        loop {
            if cancel.is_cancelled() {
                return Err(StepError::new(ErrorKind::Cancelled, "start cancelled"));
            }
            match self.probe.check(target).await {
                Ok(status) if status.healthy => return Ok(()),
                Ok(_) => {}
                Err(e) => {
                    debug!(service = target, error = %e, "probe not answering yet");
                }
            }
            tokio::time::sleep(self.config.probe_poll_interval).await;
        }
    }

    async fn validate(&self, target: &str) -> Result<(), StepError> {
        let processes = self
            .supervisor
            .list_processes()
            .await
            .map_err(|e| StepError::from_kinded(&e))?;
        let running = processes
            .iter()
            .any(|p| p.name == target && p.status == ProcessStatus::Running);
        if !running {
            return Err(StepError::new(
                ErrorKind::ServiceValidationFailed,
                format!("{target} is not running"),
            ));
        }

        match self.probe.check(target).await {
            Ok(status) if status.healthy => Ok(()),
            Ok(status) => Err(StepError::new(
                ErrorKind::ServiceValidationFailed,
                status
                    .detail
                    .unwrap_or_else(|| format!("{target} probe reports unhealthy")),
            )),
            Err(e) => Err(StepError::new(
                ErrorKind::ServiceValidationFailed,
                e.to_string(),
            )),
        }
    }
}

#[async_trait]
impl InstructionHandler for PortActionHandler {
    async fn execute(&self, ctx: ActionContext<'_>) -> std::result::Result<(), StepError> {
        let instruction = ctx.instruction;
        match instruction.action {
            RollbackAction::StopService => self.stop(&instruction.target, ctx.cancel).await,
            RollbackAction::RestoreFiles => self.restore_files(instruction, ctx.plan).await,
            RollbackAction::RestoreConfig => self.restore_config(ctx.plan).await,
            RollbackAction::RestoreDatabase => match &self.database {
                Some(database) => {
                    database
                        .restore(&instruction.target, &instruction.params, ctx.cancel)
                        .await
                }
                None => Err(StepError::new(
                    ErrorKind::InvalidArgument,
                    "no database restorer configured",
                )),
            },
            RollbackAction::StartService => self.start(&instruction.target, ctx.cancel).await,
            RollbackAction::ValidateService => self.validate(&instruction.target).await,
        }
    }
}

/// Copies a directory tree, creating parents and overwriting existing
/// files. Returns the number of files copied.
async fn copy_tree(from: &Path, to: &Path) -> std::io::Result<usize> {
    let mut copied = 0usize;
    let mut pending = vec![from.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }
            let rel = path
                .strip_prefix(from)
                .expect("walk stays under the snapshot root");
            let destination = to.join(rel);
            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&path, &destination).await?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradewind_ports::{SimProbe, SimSupervisor};
    use tradewind_versions::Instruction;

    fn handler_with(
        supervisor: Arc<SimSupervisor>,
        config: ActionConfig,
    ) -> PortActionHandler {
        let probe = Arc::new(SimProbe::attached(supervisor.clone()));
        PortActionHandler::new(supervisor, probe, config)
    }

    fn ctx<'a>(
        instruction: &'a Instruction,
        plan: &'a RollbackPlan,
        cancel: &'a CancellationToken,
    ) -> ActionContext<'a> {
        ActionContext {
            instruction,
            plan,
            cancel,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_waits_for_health() {
        let supervisor = Arc::new(
            SimSupervisor::new(["order-gateway"]).with_launch_delay(Duration::from_secs(2)),
        );
        let handler = handler_with(supervisor.clone(), ActionConfig::default());
        let plan = RollbackPlan::empty();
        let cancel = CancellationToken::new();
        let instruction =
            Instruction::new(0, RollbackAction::StartService, "order-gateway", 30, true);

        handler
            .execute(ctx(&instruction, &plan, &cancel))
            .await
            .unwrap();
        assert!(supervisor.is_running("order-gateway"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_is_classified() {
        let supervisor = Arc::new(SimSupervisor::new(["risk-engine"]));
        supervisor.inject_start_failure("risk-engine");
        let handler = handler_with(supervisor, ActionConfig::default());
        let plan = RollbackPlan::empty();
        let cancel = CancellationToken::new();
        let instruction =
            Instruction::new(0, RollbackAction::StartService, "risk-engine", 30, true);

        let err = handler
            .execute(ctx(&instruction, &plan, &cancel))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceStartFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_and_validate() {
        let supervisor = Arc::new(
            SimSupervisor::new(["a", "b"]).with_launch_delay(Duration::ZERO),
        );
        supervisor.start_all().await.unwrap();
        let handler = handler_with(supervisor.clone(), ActionConfig::default());
        let plan = RollbackPlan::empty();
        let cancel = CancellationToken::new();

        let validate = Instruction::new(0, RollbackAction::ValidateService, "a", 30, true);
        handler
            .execute(ctx(&validate, &plan, &cancel))
            .await
            .unwrap();

        let stop_all = Instruction::new(1, RollbackAction::StopService, ALL_SERVICES, 30, true);
        handler
            .execute(ctx(&stop_all, &plan, &cancel))
            .await
            .unwrap();
        assert!(!supervisor.is_running("a"));

        let err = handler
            .execute(ctx(&validate, &plan, &cancel))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceValidationFailed);
    }

    #[tokio::test]
    async fn restore_files_copies_snapshot() {
        let snapshot = tempfile::tempdir().unwrap();
        let install = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(snapshot.path().join("bin"))
            .await
            .unwrap();
        tokio::fs::write(snapshot.path().join("bin/engine"), b"v1")
            .await
            .unwrap();
        tokio::fs::write(install.path().join("stale"), b"old")
            .await
            .unwrap();

        let supervisor = Arc::new(SimSupervisor::new(["engine"]));
        let handler = handler_with(supervisor, ActionConfig::default());

        let mut plan = RollbackPlan::empty();
        plan.artifact_snapshots
            .insert("engine".to_string(), snapshot.path().to_path_buf());

        let cancel = CancellationToken::new();
        let instruction = Instruction::new(0, RollbackAction::RestoreFiles, "engine", 60, true)
            .with_param("install_path", install.path().to_string_lossy());

        handler
            .execute(ctx(&instruction, &plan, &cancel))
            .await
            .unwrap();

        let restored = tokio::fs::read(install.path().join("bin/engine"))
            .await
            .unwrap();
        assert_eq!(restored, b"v1");
    }

    #[tokio::test]
    async fn restore_config_skips_missing_snapshot() {
        let supervisor = Arc::new(SimSupervisor::new(["a"]));
        let handler = handler_with(supervisor, ActionConfig::default());

        let mut plan = RollbackPlan::empty();
        plan.config_snapshot = Some(PathBuf::from("/nonexistent/snapshot"));

        let cancel = CancellationToken::new();
        let instruction = Instruction::new(0, RollbackAction::RestoreConfig, ALL_SERVICES, 60, true);
        handler
            .execute(ctx(&instruction, &plan, &cancel))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn restore_database_requires_restorer() {
        let supervisor = Arc::new(SimSupervisor::new(["a"]));
        let handler = handler_with(supervisor, ActionConfig::default());
        let plan = RollbackPlan::empty();
        let cancel = CancellationToken::new();
        let instruction =
            Instruction::new(0, RollbackAction::RestoreDatabase, "ledger", 300, true);

        let err = handler
            .execute(ctx(&instruction, &plan, &cancel))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
