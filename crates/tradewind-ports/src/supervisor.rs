//! Process supervisor port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PortResult;

/// Lifecycle state a supervised process can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    /// Process is up and serving.
    Running,
    /// Process is not running.
    Stopped,
    /// Process was started and has not reported ready yet.
    Launching,
    /// Process exited abnormally or failed to launch.
    Errored,
}

/// Snapshot of one supervised process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Supervisor-registered process name.
    pub name: String,
    /// OS pid when running.
    pub pid: Option<u32>,
    /// Current lifecycle state.
    pub status: ProcessStatus,
    /// Seconds since the process entered `Running`.
    pub uptime_secs: u64,
    /// Resident set size in bytes.
    pub rss_bytes: u64,
    /// CPU utilisation percentage over the supervisor's sampling window.
    pub cpu_pct: f64,
}

/// Port to the process supervisor that runs the trading workloads.
///
/// All operations return structured results; adapters never panic or throw
/// across this boundary. A `stop` is a graceful shutdown request; callers
/// that need a hard stop re-issue it after their graceful timeout.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Starts a process by name.
    async fn start_process(&self, name: &str) -> PortResult<()>;

    /// Requests a graceful stop of a process by name.
    async fn stop_process(&self, name: &str) -> PortResult<()>;

    /// Restarts a process by name.
    async fn restart_process(&self, name: &str) -> PortResult<()>;

    /// Stops every supervised process.
    async fn stop_all(&self) -> PortResult<()>;

    /// Starts every supervised process.
    async fn start_all(&self) -> PortResult<()>;

    /// Lists all supervised processes with their current state.
    async fn list_processes(&self) -> PortResult<Vec<ProcessInfo>>;

    /// Returns the last `lines` log lines of a process.
    async fn tail_logs(&self, name: &str, lines: usize) -> PortResult<Vec<String>>;
}
