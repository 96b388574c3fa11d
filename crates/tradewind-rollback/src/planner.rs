//! Rollback planner: dependency DAG and antichain grouping.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use daggy::Dag;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tradewind_versions::{Instruction, RollbackAction, ServiceRecord, ALL_SERVICES};

use crate::error::{Result, RollbackError};

/// One parallel group of the schedule. Instructions inside a group have no
/// mutual dependencies and may run concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedGroup {
    /// Group position in the schedule.
    pub index: usize,
    /// Instructions running concurrently in this group.
    pub instructions: Vec<Instruction>,
    /// Worst-case group duration: the largest per-step timeout.
    pub estimated_secs: u64,
}

/// The executable schedule: ordered parallel groups plus duration
/// estimates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Ordered groups.
    pub groups: Vec<PlannedGroup>,
    /// Worst-case schedule duration: sum of group estimates.
    pub estimated_duration_secs: u64,
    /// Worst-case strictly sequential duration: sum of all step timeouts.
    pub sequential_duration_secs: u64,
}

impl ExecutionPlan {
    /// Seconds saved over strictly sequential execution.
    pub fn parallel_gain_secs(&self) -> u64 {
        self.sequential_duration_secs
            .saturating_sub(self.estimated_duration_secs)
    }

    /// Total instruction count across groups.
    pub fn total_steps(&self) -> usize {
        self.groups.iter().map(|g| g.instructions.len()).sum()
    }
}

/// Compatibility class an instruction schedules under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    /// Must run alone.
    Exclusive,
    /// Distinct restore-files targets may share a group.
    RestoreFiles,
    /// Distinct start/validate targets may share a group.
    StartValidate,
    /// Everything else runs as a singleton group.
    Singleton,
}

fn class_of(instruction: &Instruction) -> Class {
    if instruction.is_exclusive() {
        return Class::Exclusive;
    }
    match instruction.action {
        RollbackAction::RestoreFiles => Class::RestoreFiles,
        RollbackAction::StartService | RollbackAction::ValidateService => Class::StartValidate,
        _ => Class::Singleton,
    }
}

/// What a plan transitively affects: the set an operator reviews before
/// approving a rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastRadius {
    /// Services an instruction names directly.
    pub services: BTreeSet<String>,
    /// Services affected only through the dependency graph.
    pub dependents: BTreeSet<String>,
    /// Whether a stop-all barrier takes the whole fleet down.
    pub entire_fleet: bool,
    /// Whether configuration files are rewritten.
    pub config_touched: bool,
    /// Whether a database restore is involved.
    pub database_touched: bool,
}

impl BlastRadius {
    /// Total number of services in the radius.
    pub fn service_count(&self) -> usize {
        self.services.len() + self.dependents.len()
    }
}

/// Builds dependency-respecting schedules from raw instruction lists.
pub struct RollbackPlanner;

impl RollbackPlanner {
    /// Plans `instructions` into parallel groups.
    ///
    /// `services` supplies the start-ordering constraints between
    /// services; a service only starts once every dependency it declares
    /// has started (and validated, when a validation step exists).
    ///
    /// Rejected at planning: an instruction set whose dependency graph has
    /// a cycle, a start/validate with no preceding stop or restore for its
    /// service, and a validate with no start.
    pub fn plan(
        instructions: &[Instruction],
        services: &[ServiceRecord],
    ) -> Result<ExecutionPlan> {
        if instructions.is_empty() {
            return Err(RollbackError::InvalidPlan(
                "plan contains no instructions".to_string(),
            ));
        }

        let edges = build_edges(instructions, services)?;

        // daggy rejects the edge that would close a cycle.
        let mut dag: Dag<usize, ()> = Dag::new();
        let nodes: Vec<_> = (0..instructions.len()).map(|i| dag.add_node(i)).collect();
        for &(from, to) in &edges {
            dag.add_edge(nodes[from], nodes[to], ()).map_err(|_| {
                RollbackError::InvalidPlan(format!(
                    "dependency cycle through steps {from} and {to}"
                ))
            })?;
        }

        let groups = layer_groups(instructions, &edges);
        let estimated_duration_secs = groups.iter().map(|g| g.estimated_secs).sum();
        let sequential_duration_secs = instructions.iter().map(|i| i.timeout_secs).sum();

        debug!(
            steps = instructions.len(),
            groups = groups.len(),
            estimated_duration_secs,
            sequential_duration_secs,
            "rollback plan built"
        );

        Ok(ExecutionPlan {
            groups,
            estimated_duration_secs,
            sequential_duration_secs,
        })
    }

    /// Computes what `instructions` transitively affect.
    ///
    /// Direct services are instruction targets; dependents are services
    /// from the version's record set that (transitively) depend on a
    /// direct one, so an operator sees the full disruption surface.
    pub fn blast_radius(
        instructions: &[Instruction],
        services: &[ServiceRecord],
    ) -> BlastRadius {
        let mut direct = BTreeSet::new();
        let mut entire_fleet = false;
        let mut config_touched = false;
        let mut database_touched = false;

        for instruction in instructions {
            match instruction.action {
                RollbackAction::StopService if instruction.target == ALL_SERVICES => {
                    entire_fleet = true;
                }
                RollbackAction::StopService
                | RollbackAction::RestoreFiles
                | RollbackAction::StartService
                | RollbackAction::ValidateService => {
                    direct.insert(instruction.target.clone());
                }
                RollbackAction::RestoreConfig => config_touched = true,
                RollbackAction::RestoreDatabase => database_touched = true,
            }
        }

        // Reverse dependency walk: anything that depends on an affected
        // service is disrupted when it restarts.
        let mut dependents_of: HashMap<&str, Vec<&str>> = HashMap::new();
        for service in services {
            for dep in &service.depends_on {
                dependents_of
                    .entry(dep.as_str())
                    .or_default()
                    .push(service.name.as_str());
            }
        }
        let mut dependents = BTreeSet::new();
        let mut queue: VecDeque<&str> = direct.iter().map(String::as_str).collect();
        let mut seen: HashSet<&str> = direct.iter().map(String::as_str).collect();
        while let Some(name) = queue.pop_front() {
            if let Some(children) = dependents_of.get(name) {
                for &child in children {
                    if seen.insert(child) {
                        dependents.insert(child.to_string());
                        queue.push_back(child);
                    }
                }
            }
        }

        BlastRadius {
            services: direct,
            dependents,
            entire_fleet,
            config_touched,
            database_touched,
        }
    }

    /// Degenerate schedule used when parallel groups are disabled: one
    /// instruction per group, in raw order.
    pub fn sequential(instructions: &[Instruction]) -> Result<ExecutionPlan> {
        if instructions.is_empty() {
            return Err(RollbackError::InvalidPlan(
                "plan contains no instructions".to_string(),
            ));
        }
        let groups: Vec<PlannedGroup> = instructions
            .iter()
            .enumerate()
            .map(|(index, instruction)| PlannedGroup {
                index,
                instructions: vec![instruction.clone()],
                estimated_secs: instruction.timeout_secs,
            })
            .collect();
        let total: u64 = instructions.iter().map(|i| i.timeout_secs).sum();
        Ok(ExecutionPlan {
            groups,
            estimated_duration_secs: total,
            sequential_duration_secs: total,
        })
    }
}

/// Whether `target` covers service `name` (exact match or "all").
fn covers(target: &str, name: &str) -> bool {
    target == name || target == ALL_SERVICES
}

fn build_edges(
    instructions: &[Instruction],
    services: &[ServiceRecord],
) -> Result<Vec<(usize, usize)>> {
    let mut edges: HashSet<(usize, usize)> = HashSet::new();

    // Positions of start/validate per service, for ordering constraints.
    let mut start_of: HashMap<&str, usize> = HashMap::new();
    let mut validate_of: HashMap<&str, usize> = HashMap::new();
    for (i, instruction) in instructions.iter().enumerate() {
        match instruction.action {
            RollbackAction::StartService => {
                start_of.insert(instruction.target.as_str(), i);
            }
            RollbackAction::ValidateService => {
                validate_of.insert(instruction.target.as_str(), i);
            }
            _ => {}
        }
    }

    for (i, instruction) in instructions.iter().enumerate() {
        match instruction.action {
            RollbackAction::StartService => {
                let target = instruction.target.as_str();
                let mut resolved = false;
                for (j, earlier) in instructions.iter().enumerate().take(i) {
                    let depends = match earlier.action {
                        RollbackAction::StopService => covers(&earlier.target, target),
                        RollbackAction::RestoreFiles => earlier.target == target,
                        RollbackAction::RestoreConfig => covers(&earlier.target, target),
                        RollbackAction::RestoreDatabase => true,
                        _ => false,
                    };
                    if depends {
                        edges.insert((j, i));
                        if earlier.action != RollbackAction::RestoreDatabase {
                            resolved = true;
                        }
                    }
                }
                if !resolved {
                    return Err(RollbackError::InvalidPlan(format!(
                        "start-service {target} has no preceding stop or restore"
                    )));
                }
                // A service starts only after each of its declared
                // dependencies has started, and validated when the plan
                // validates it.
                if let Some(service) = services.iter().find(|s| s.name == target) {
                    for dep in &service.depends_on {
                        let gate = validate_of
                            .get(dep.as_str())
                            .or_else(|| start_of.get(dep.as_str()));
                        if let Some(&g) = gate {
                            edges.insert((g, i));
                        }
                    }
                }
            }
            RollbackAction::ValidateService => {
                let target = instruction.target.as_str();
                match start_of.get(target) {
                    Some(&s) => {
                        edges.insert((s, i));
                    }
                    None => {
                        return Err(RollbackError::InvalidPlan(format!(
                            "validate-service {target} has no start-service"
                        )))
                    }
                }
            }
            RollbackAction::RestoreFiles
            | RollbackAction::RestoreConfig
            | RollbackAction::RestoreDatabase => {
                for (j, earlier) in instructions.iter().enumerate().take(i) {
                    if earlier.action == RollbackAction::StopService
                        && (covers(&earlier.target, &instruction.target)
                            || earlier.target == ALL_SERVICES)
                    {
                        edges.insert((j, i));
                    }
                }
            }
            RollbackAction::StopService => {}
        }

        // Exclusive instructions are barriers: everything earlier happens
        // before them, everything later happens after.
        if instruction.is_exclusive() {
            for j in 0..i {
                edges.insert((j, i));
            }
            for j in (i + 1)..instructions.len() {
                edges.insert((i, j));
            }
        }
    }

    Ok(edges.into_iter().collect())
}

fn layer_groups(instructions: &[Instruction], edges: &[(usize, usize)]) -> Vec<PlannedGroup> {
    let n = instructions.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(from, to) in edges {
        in_degree[to] += 1;
        dependents[from].push(to);
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut groups = Vec::new();

    while let Some(&first) = ready.iter().next() {
        let class = class_of(&instructions[first]);
        let mut members = vec![first];

        if matches!(class, Class::RestoreFiles | Class::StartValidate) {
            let mut seen_targets: HashSet<&str> =
                [instructions[first].target.as_str()].into();
            for &candidate in ready.iter().skip(1) {
                if class_of(&instructions[candidate]) == class
                    && seen_targets.insert(instructions[candidate].target.as_str())
                {
                    members.push(candidate);
                }
            }
        }

        for &member in &members {
            ready.remove(&member);
            for &next in &dependents[member] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        let estimated_secs = members
            .iter()
            .map(|&i| instructions[i].timeout_secs)
            .max()
            .unwrap_or(0);
        groups.push(PlannedGroup {
            index: groups.len(),
            instructions: members
                .iter()
                .map(|&i| instructions[i].clone())
                .collect(),
            estimated_secs,
        });
    }

    groups
}
