//! Simulated supervisor and probe adapters.
//!
//! These back the DR harness dry-run path and the test suites: a process
//! table with configurable launch latency and injectable failures, and a
//! probe whose answers track the simulated process state.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{PortError, PortResult};
use crate::probe::{HealthProbe, HealthStatus};
use crate::supervisor::{ProcessInfo, ProcessStatus, Supervisor};

#[derive(Debug, Clone)]
struct SimProcess {
    status: ProcessStatus,
    started_at: Option<Instant>,
    ready_at: Option<Instant>,
    pid: Option<u32>,
}

impl SimProcess {
    fn stopped() -> Self {
        Self {
            status: ProcessStatus::Stopped,
            started_at: None,
            ready_at: None,
            pid: None,
        }
    }
}

/// In-memory supervisor simulating a fleet of trading services.
pub struct SimSupervisor {
    processes: DashMap<String, SimProcess>,
    fail_start: DashMap<String, ()>,
    launch_delay: Duration,
    next_pid: AtomicU32,
}

impl SimSupervisor {
    /// Creates a supervisor with the given service names, all stopped.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let processes = DashMap::new();
        for name in names {
            processes.insert(name.into(), SimProcess::stopped());
        }
        Self {
            processes,
            fail_start: DashMap::new(),
            launch_delay: Duration::from_millis(50),
            next_pid: AtomicU32::new(4000),
        }
    }

    /// Sets how long a started process stays `Launching` before it reports
    /// `Running`.
    pub fn with_launch_delay(self, delay: Duration) -> Self {
        Self {
            launch_delay: delay,
            ..self
        }
    }

    /// Makes every subsequent start of `name` fail until cleared.
    pub fn inject_start_failure(&self, name: &str) {
        self.fail_start.insert(name.to_string(), ());
    }

    /// Clears an injected start failure.
    pub fn clear_start_failure(&self, name: &str) {
        self.fail_start.remove(name);
    }

    /// Simulates an abnormal exit of `name` (DR failure injection).
    pub fn kill(&self, name: &str) -> PortResult<()> {
        let mut process = self
            .processes
            .get_mut(name)
            .ok_or_else(|| PortError::ProcessNotFound(name.to_string()))?;
        process.status = ProcessStatus::Errored;
        process.started_at = None;
        process.ready_at = None;
        process.pid = None;
        Ok(())
    }

    /// Whether `name` currently reports `Running`.
    pub fn is_running(&self, name: &str) -> bool {
        self.resolve(name)
            .map(|s| s == ProcessStatus::Running)
            .unwrap_or(false)
    }

    /// Resolves Launching to Running once the launch delay has elapsed.
    fn resolve(&self, name: &str) -> Option<ProcessStatus> {
        let mut process = self.processes.get_mut(name)?;
        if process.status == ProcessStatus::Launching {
            if let Some(ready_at) = process.ready_at {
                if Instant::now() >= ready_at {
                    process.status = ProcessStatus::Running;
                }
            }
        }
        Some(process.status)
    }

    fn start_one(&self, name: &str) -> PortResult<()> {
        if self.fail_start.contains_key(name) {
            return Err(PortError::Supervisor(format!(
                "simulated launch failure for {name}"
            )));
        }
        let mut process = self
            .processes
            .get_mut(name)
            .ok_or_else(|| PortError::ProcessNotFound(name.to_string()))?;
        let now = Instant::now();
        process.status = ProcessStatus::Launching;
        process.started_at = Some(now);
        process.ready_at = Some(now + self.launch_delay);
        process.pid = Some(self.next_pid.fetch_add(1, Ordering::SeqCst));
        debug!(service = name, "sim supervisor launching");
        Ok(())
    }

    fn stop_one(&self, name: &str) -> PortResult<()> {
        let mut process = self
            .processes
            .get_mut(name)
            .ok_or_else(|| PortError::ProcessNotFound(name.to_string()))?;
        *process = SimProcess::stopped();
        debug!(service = name, "sim supervisor stopped");
        Ok(())
    }
}

#[async_trait]
impl Supervisor for SimSupervisor {
    async fn start_process(&self, name: &str) -> PortResult<()> {
        self.start_one(name)
    }

    async fn stop_process(&self, name: &str) -> PortResult<()> {
        self.stop_one(name)
    }

    async fn restart_process(&self, name: &str) -> PortResult<()> {
        self.stop_one(name)?;
        self.start_one(name)
    }

    async fn stop_all(&self) -> PortResult<()> {
        let names: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.stop_one(&name)?;
        }
        Ok(())
    }

    async fn start_all(&self) -> PortResult<()> {
        let names: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.start_one(&name)?;
        }
        Ok(())
    }

    async fn list_processes(&self) -> PortResult<Vec<ProcessInfo>> {
        let names: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            let status = self.resolve(&name).unwrap_or(ProcessStatus::Stopped);
            let entry = self
                .processes
                .get(&name)
                .ok_or_else(|| PortError::ProcessNotFound(name.clone()))?;
            let uptime_secs = entry
                .started_at
                .map(|t| Instant::now().duration_since(t).as_secs())
                .unwrap_or(0);
            infos.push(ProcessInfo {
                name: name.clone(),
                pid: entry.pid,
                status,
                uptime_secs,
                rss_bytes: 64 * 1024 * 1024,
                cpu_pct: 1.5,
            });
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn tail_logs(&self, name: &str, lines: usize) -> PortResult<Vec<String>> {
        if !self.processes.contains_key(name) {
            return Err(PortError::ProcessNotFound(name.to_string()));
        }
        Ok(vec![format!("[sim] {name} log tail ({lines} lines requested)")])
    }
}

/// Probe whose answers follow a [`SimSupervisor`] process table, with
/// per-service overrides for scripted failure scenarios.
pub struct SimProbe {
    supervisor: Arc<SimSupervisor>,
    overrides: DashMap<String, HealthStatus>,
    latency_ms: u64,
}

impl SimProbe {
    /// Creates a probe tracking `supervisor`.
    pub fn attached(supervisor: Arc<SimSupervisor>) -> Self {
        Self {
            supervisor,
            overrides: DashMap::new(),
            latency_ms: 3,
        }
    }

    /// Forces the next answers for `service` regardless of process state.
    pub fn set_override(&self, service: &str, status: HealthStatus) {
        self.overrides.insert(service.to_string(), status);
    }

    /// Removes a scripted override.
    pub fn clear_override(&self, service: &str) {
        self.overrides.remove(service);
    }
}

#[async_trait]
impl HealthProbe for SimProbe {
    async fn check(&self, service: &str) -> PortResult<HealthStatus> {
        if let Some(status) = self.overrides.get(service) {
            return Ok(status.clone());
        }
        if !self.supervisor.processes.contains_key(service) {
            return Err(PortError::ProbeUnreachable {
                service: service.to_string(),
                reason: "unknown service".to_string(),
            });
        }
        if self.supervisor.is_running(service) {
            Ok(HealthStatus::healthy(self.latency_ms))
        } else {
            Ok(HealthStatus::unhealthy(
                self.latency_ms,
                "process not running",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn launch_delay_resolves_to_running() {
        let sup = SimSupervisor::new(["order-gateway"]).with_launch_delay(Duration::from_secs(2));
        sup.start_process("order-gateway").await.unwrap();
        assert!(!sup.is_running("order-gateway"));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(sup.is_running("order-gateway"));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_tracks_supervisor() {
        let sup = Arc::new(
            SimSupervisor::new(["risk-engine"]).with_launch_delay(Duration::from_millis(10)),
        );
        let probe = SimProbe::attached(sup.clone());

        let status = probe.check("risk-engine").await.unwrap();
        assert!(!status.healthy);

        sup.start_process("risk-engine").await.unwrap();
        tokio::time::advance(Duration::from_millis(20)).await;
        let status = probe.check("risk-engine").await.unwrap();
        assert!(status.healthy);

        assert!(probe.check("unknown").await.is_err());
    }

    #[tokio::test]
    async fn injected_start_failure() {
        let sup = SimSupervisor::new(["md-feed"]);
        sup.inject_start_failure("md-feed");
        assert!(sup.start_process("md-feed").await.is_err());
        sup.clear_start_failure("md-feed");
        assert!(sup.start_process("md-feed").await.is_ok());
    }

    #[tokio::test]
    async fn kill_marks_errored() {
        let sup = SimSupervisor::new(["settlement"]).with_launch_delay(Duration::ZERO);
        sup.start_process("settlement").await.unwrap();
        sup.kill("settlement").unwrap();

        let procs = sup.list_processes().await.unwrap();
        assert_eq!(procs[0].status, ProcessStatus::Errored);
    }
}
