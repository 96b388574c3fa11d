//! Health-probe port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PortResult;

/// Result of probing one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the service answered healthy.
    pub healthy: bool,
    /// Round-trip latency of the probe in milliseconds.
    pub latency_ms: u64,
    /// Free-form detail from the probe endpoint.
    pub detail: Option<String>,
}

impl HealthStatus {
    /// A healthy answer with the given latency.
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            latency_ms,
            detail: None,
        }
    }

    /// An unhealthy answer carrying a reason.
    pub fn unhealthy(latency_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency_ms,
            detail: Some(detail.into()),
        }
    }
}

/// Port to the HTTP health-check probes.
///
/// Adapters must answer within their configured per-probe timeout and map
/// a missed deadline to `PortError::ProbeTimeout`. Callers poll at a fixed
/// interval; the probe itself holds no polling state.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probes the named service once.
    async fn check(&self, service: &str) -> PortResult<HealthStatus>;
}

/// Decorator enforcing the per-probe timeout around any inner probe.
///
/// Adapters that already bound their own transport can be used bare; this
/// wrapper guarantees the contract for those that cannot.
pub struct TimeoutProbe {
    inner: std::sync::Arc<dyn HealthProbe>,
    timeout: std::time::Duration,
}

impl TimeoutProbe {
    /// Wraps `inner`, failing any probe that takes longer than `timeout`.
    pub fn new(inner: std::sync::Arc<dyn HealthProbe>, timeout: std::time::Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl HealthProbe for TimeoutProbe {
    async fn check(&self, service: &str) -> PortResult<HealthStatus> {
        match tokio::time::timeout(self.timeout, self.inner.check(service)).await {
            Ok(result) => result,
            Err(_) => Err(crate::error::PortError::ProbeTimeout(service.to_string())),
        }
    }
}
