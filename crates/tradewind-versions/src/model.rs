//! Version record data model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::RollbackPlan;

/// Lifecycle status of a version record. The only mutable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    /// Deployed at some point, currently not serving.
    Inactive,
    /// The version the fleet currently runs. At most one.
    Active,
    /// Retained for audit only; not a rollback target.
    Archived,
}

/// One service as captured at deployment time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Supervisor-registered service name.
    pub name: String,
    /// Service version string.
    pub version: String,
    /// Content fingerprint of the built artifact.
    pub artifact_fingerprint: String,
    /// Content fingerprint of the service configuration.
    pub config_fingerprint: String,
    /// Names of services that must be running before this one starts.
    pub depends_on: Vec<String>,
    /// Health-probe endpoint, when the service exposes one.
    pub health_endpoint: Option<String>,
    /// Seconds the service may take to become healthy after start.
    pub startup_timeout_secs: u64,
}

/// Who deployed, why, and from where.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMetadata {
    /// Operator or automation actor.
    pub deployed_by: String,
    /// Free-form deployment reason.
    pub reason: String,
    /// Git commit the artifacts were built from.
    pub git_commit: Option<String>,
    /// Deployment environment (production, staging, ...).
    pub environment: String,
    /// Wall-clock duration of the deployment.
    pub deploy_duration_ms: u64,
}

/// System-level dependency snapshot taken at deployment time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemDependencies {
    /// Language runtimes and their versions (e.g. "rustc" -> "1.78").
    pub runtimes: BTreeMap<String, String>,
    /// External service endpoints the fleet talks to.
    pub external_endpoints: BTreeMap<String, String>,
    /// Fingerprint of the merged configuration tree.
    pub config_fingerprint: String,
}

/// An immutable deployment version.
///
/// Everything except `status` is frozen at creation; the store rejects any
/// other mutation path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    /// Unique record id (timestamp plus random suffix).
    pub id: String,
    /// Human version string, e.g. "2024.18.2".
    pub version: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Ordered service snapshots.
    pub services: Vec<ServiceRecord>,
    /// Deployment metadata.
    pub metadata: VersionMetadata,
    /// System dependency snapshot.
    pub dependencies: SystemDependencies,
    /// Lifecycle status.
    pub status: VersionStatus,
    /// Executable rollback plan restoring this version.
    pub rollback_plan: RollbackPlan,
}

impl Version {
    /// Whether this version may be used as a rollback target.
    pub fn is_rollback_target(&self) -> bool {
        self.status == VersionStatus::Inactive
    }

    /// Looks up a service snapshot by name.
    pub fn service(&self, name: &str) -> Option<&ServiceRecord> {
        self.services.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::RollbackPlan;

    fn sample_version(status: VersionStatus) -> Version {
        Version {
            id: "v-20260801-abcdef".to_string(),
            version: "1.0.0".to_string(),
            created_at: Utc::now(),
            services: vec![ServiceRecord {
                name: "order-gateway".to_string(),
                version: "1.0.0".to_string(),
                artifact_fingerprint: "sha256:aa".to_string(),
                config_fingerprint: "sha256:bb".to_string(),
                depends_on: vec![],
                health_endpoint: Some("http://localhost:7001/health".to_string()),
                startup_timeout_secs: 30,
            }],
            metadata: VersionMetadata::default(),
            dependencies: SystemDependencies::default(),
            status,
            rollback_plan: RollbackPlan::empty(),
        }
    }

    #[test]
    fn only_inactive_versions_are_targets() {
        assert!(sample_version(VersionStatus::Inactive).is_rollback_target());
        assert!(!sample_version(VersionStatus::Active).is_rollback_target());
        assert!(!sample_version(VersionStatus::Archived).is_rollback_target());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&VersionStatus::Active).unwrap();
        assert_eq!(json, "\"active\"");
    }
}
