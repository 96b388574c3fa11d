//! Rollback plan and instruction model.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VersionError};
use crate::model::ServiceRecord;

/// Target value meaning "every supervised service".
pub const ALL_SERVICES: &str = "all";

/// The action one rollback instruction performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackAction {
    /// Graceful stop (then force) of the target service, or of all.
    StopService,
    /// Copy the artifact snapshot tree back into the install path.
    RestoreFiles,
    /// Copy known config files from the snapshot to their locations.
    RestoreConfig,
    /// Restore a database backup. Exclusive with everything else.
    RestoreDatabase,
    /// Start the target service and wait for health.
    StartService,
    /// Run the deployment validator against the target service.
    ValidateService,
}

impl RollbackAction {
    /// Stable kebab-case name used in logs, events and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            RollbackAction::StopService => "stop-service",
            RollbackAction::RestoreFiles => "restore-files",
            RollbackAction::RestoreConfig => "restore-config",
            RollbackAction::RestoreDatabase => "restore-database",
            RollbackAction::StartService => "start-service",
            RollbackAction::ValidateService => "validate-service",
        }
    }
}

impl std::fmt::Display for RollbackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a rollback plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Position in the raw plan. Stable across planning.
    pub step: usize,
    /// What to do.
    pub action: RollbackAction,
    /// Service name, [`ALL_SERVICES`], or a backup path.
    pub target: String,
    /// Action-specific parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Per-step timeout in seconds.
    pub timeout_secs: u64,
    /// Whether a failure of this step aborts the whole run.
    pub abort_on_failure: bool,
}

impl Instruction {
    /// Creates an instruction with no parameters.
    pub fn new(
        step: usize,
        action: RollbackAction,
        target: impl Into<String>,
        timeout_secs: u64,
        abort_on_failure: bool,
    ) -> Self {
        Self {
            step,
            action,
            target: target.into(),
            params: BTreeMap::new(),
            timeout_secs,
            abort_on_failure,
        }
    }

    /// Adds a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Whether this instruction must run alone in its group.
    pub fn is_exclusive(&self) -> bool {
        matches!(self.action, RollbackAction::RestoreDatabase)
            || (self.action == RollbackAction::StopService && self.target == ALL_SERVICES)
    }
}

/// Executable plan restoring one version, plus pointers to the snapshots
/// the restore instructions read from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackPlan {
    /// Ordered instruction list.
    pub instructions: Vec<Instruction>,
    /// Configuration snapshot directory.
    pub config_snapshot: Option<PathBuf>,
    /// Per-service artifact snapshot directories.
    #[serde(default)]
    pub artifact_snapshots: BTreeMap<String, PathBuf>,
    /// Root directory holding every snapshot of this version; removed when
    /// the version is deleted.
    pub snapshot_root: Option<PathBuf>,
}

impl RollbackPlan {
    /// An empty plan (used by versions created before any services ran).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the standard restore plan for a service set:
    /// stop everything, restore configuration, restore each service's
    /// files, then start and validate services in dependency order.
    pub fn standard(
        services: &[ServiceRecord],
        config_snapshot: Option<PathBuf>,
        artifact_snapshots: BTreeMap<String, PathBuf>,
        snapshot_root: Option<PathBuf>,
    ) -> Result<Self> {
        let ordered = dependency_order(services)?;
        let mut instructions = Vec::new();
        let mut step = 0usize;
        let mut push = |action, target: &str, timeout, abort| {
            instructions.push(Instruction::new(step, action, target, timeout, abort));
            step += 1;
        };

        push(RollbackAction::StopService, ALL_SERVICES, 30, true);
        if config_snapshot.is_some() {
            push(RollbackAction::RestoreConfig, ALL_SERVICES, 60, true);
        }
        for service in &ordered {
            if artifact_snapshots.contains_key(&service.name) {
                push(RollbackAction::RestoreFiles, &service.name, 60, true);
            }
        }
        for service in &ordered {
            push(
                RollbackAction::StartService,
                &service.name,
                service.startup_timeout_secs.max(1),
                true,
            );
            if service.health_endpoint.is_some() {
                push(RollbackAction::ValidateService, &service.name, 30, true);
            }
        }

        Ok(Self {
            instructions,
            config_snapshot,
            artifact_snapshots,
            snapshot_root,
        })
    }

    /// Sum of per-step timeouts: the worst-case strictly sequential cost.
    pub fn sequential_timeout_secs(&self) -> u64 {
        self.instructions.iter().map(|i| i.timeout_secs).sum()
    }
}

/// Orders services so that every dependency precedes its dependents.
/// Dependencies naming services outside the set are ignored.
fn dependency_order(services: &[ServiceRecord]) -> Result<Vec<ServiceRecord>> {
    let index: HashMap<&str, usize> = services
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; services.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); services.len()];
    for (i, service) in services.iter().enumerate() {
        for dep in &service.depends_on {
            if let Some(&d) = index.get(dep.as_str()) {
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..services.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(services.len());
    while let Some(i) = queue.pop_front() {
        ordered.push(services[i].clone());
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if ordered.len() != services.len() {
        return Err(VersionError::InvalidArgument(
            "service dependency cycle".to_string(),
        ));
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, deps: &[&str]) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            artifact_fingerprint: format!("sha256:{name}"),
            config_fingerprint: format!("sha256:{name}-cfg"),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            health_endpoint: Some(format!("http://localhost/{name}/health")),
            startup_timeout_secs: 30,
        }
    }

    #[test]
    fn standard_plan_orders_dependencies() {
        let services = vec![service("b", &["a"]), service("a", &[])];
        let snapshots: BTreeMap<String, PathBuf> = [
            ("a".to_string(), PathBuf::from("/snap/a")),
            ("b".to_string(), PathBuf::from("/snap/b")),
        ]
        .into();

        let plan = RollbackPlan::standard(
            &services,
            Some(PathBuf::from("/snap/config")),
            snapshots,
            Some(PathBuf::from("/snap")),
        )
        .unwrap();

        let actions: Vec<(RollbackAction, &str)> = plan
            .instructions
            .iter()
            .map(|i| (i.action, i.target.as_str()))
            .collect();

        assert_eq!(actions[0], (RollbackAction::StopService, ALL_SERVICES));
        assert_eq!(actions[1], (RollbackAction::RestoreConfig, ALL_SERVICES));
        // a restores and starts before b.
        let start_a = actions
            .iter()
            .position(|a| *a == (RollbackAction::StartService, "a"))
            .unwrap();
        let start_b = actions
            .iter()
            .position(|a| *a == (RollbackAction::StartService, "b"))
            .unwrap();
        assert!(start_a < start_b);
        // validate follows each start.
        assert_eq!(actions[start_a + 1], (RollbackAction::ValidateService, "a"));
    }

    #[test]
    fn dependency_cycle_rejected() {
        let services = vec![service("a", &["b"]), service("b", &["a"])];
        assert!(RollbackPlan::standard(&services, None, BTreeMap::new(), None).is_err());
    }

    #[test]
    fn exclusivity() {
        let stop_all = Instruction::new(0, RollbackAction::StopService, ALL_SERVICES, 30, true);
        let stop_one = Instruction::new(0, RollbackAction::StopService, "a", 30, true);
        let restore_db = Instruction::new(1, RollbackAction::RestoreDatabase, "ledger", 300, true);
        assert!(stop_all.is_exclusive());
        assert!(!stop_one.is_exclusive());
        assert!(restore_db.is_exclusive());
    }

    #[test]
    fn step_indices_are_dense() {
        let services = vec![service("a", &[])];
        let plan = RollbackPlan::standard(&services, None, BTreeMap::new(), None).unwrap();
        for (i, instruction) in plan.instructions.iter().enumerate() {
            assert_eq!(instruction.step, i);
        }
    }
}
