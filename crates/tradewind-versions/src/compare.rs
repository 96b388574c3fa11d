//! Version comparison and per-service history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Version, VersionStatus};

/// How one service differs between two versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServiceChange {
    /// Present in `to` but not in `from`.
    Added {
        /// Service name.
        name: String,
        /// Version string it arrives at.
        version: String,
    },
    /// Present in `from` but not in `to`.
    Removed {
        /// Service name.
        name: String,
    },
    /// Present in both with differing fingerprints.
    Modified {
        /// Service name.
        name: String,
        /// Version string in `from`.
        from_version: String,
        /// Version string in `to`.
        to_version: String,
        /// Whether the built artifact changed.
        artifact_changed: bool,
        /// Whether the configuration changed.
        config_changed: bool,
    },
}

/// One changed entry of the system dependency set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyDelta {
    /// Dependency name (runtime or endpoint key).
    pub name: String,
    /// Value in `from`, when present.
    pub from: Option<String>,
    /// Value in `to`, when present.
    pub to: Option<String>,
}

/// Structured difference between two versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDiff {
    /// Id of the older side of the comparison.
    pub from_id: String,
    /// Id of the newer side of the comparison.
    pub to_id: String,
    /// Per-service changes.
    pub services: Vec<ServiceChange>,
    /// Runtime version changes.
    pub runtimes: Vec<DependencyDelta>,
    /// External endpoint changes.
    pub external_endpoints: Vec<DependencyDelta>,
    /// Whether the merged configuration fingerprint changed.
    pub config_changed: bool,
}

impl VersionDiff {
    /// Whether the two versions are materially identical.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
            && self.runtimes.is_empty()
            && self.external_endpoints.is_empty()
            && !self.config_changed
    }
}

/// Computes the structured difference between two versions.
pub fn diff(from: &Version, to: &Version) -> VersionDiff {
    let mut services = Vec::new();

    for service in &to.services {
        match from.service(&service.name) {
            None => services.push(ServiceChange::Added {
                name: service.name.clone(),
                version: service.version.clone(),
            }),
            Some(old) => {
                let artifact_changed = old.artifact_fingerprint != service.artifact_fingerprint;
                let config_changed = old.config_fingerprint != service.config_fingerprint;
                if artifact_changed || config_changed {
                    services.push(ServiceChange::Modified {
                        name: service.name.clone(),
                        from_version: old.version.clone(),
                        to_version: service.version.clone(),
                        artifact_changed,
                        config_changed,
                    });
                }
            }
        }
    }
    for service in &from.services {
        if to.service(&service.name).is_none() {
            services.push(ServiceChange::Removed {
                name: service.name.clone(),
            });
        }
    }

    VersionDiff {
        from_id: from.id.clone(),
        to_id: to.id.clone(),
        services,
        runtimes: map_delta(&from.dependencies.runtimes, &to.dependencies.runtimes),
        external_endpoints: map_delta(
            &from.dependencies.external_endpoints,
            &to.dependencies.external_endpoints,
        ),
        config_changed: from.dependencies.config_fingerprint != to.dependencies.config_fingerprint,
    }
}

fn map_delta(
    from: &std::collections::BTreeMap<String, String>,
    to: &std::collections::BTreeMap<String, String>,
) -> Vec<DependencyDelta> {
    let mut deltas = Vec::new();
    for (name, to_value) in to {
        match from.get(name) {
            Some(from_value) if from_value == to_value => {}
            from_value => deltas.push(DependencyDelta {
                name: name.clone(),
                from: from_value.cloned(),
                to: Some(to_value.clone()),
            }),
        }
    }
    for (name, from_value) in from {
        if !to.contains_key(name) {
            deltas.push(DependencyDelta {
                name: name.clone(),
                from: Some(from_value.clone()),
                to: None,
            });
        }
    }
    deltas
}

/// One appearance of a service in the version timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHistoryEntry {
    /// Version record the service appeared in.
    pub version_id: String,
    /// When that version was created.
    pub created_at: DateTime<Utc>,
    /// The service's own version string at that point.
    pub service_version: String,
    /// Artifact fingerprint at that point.
    pub artifact_fingerprint: String,
    /// Status of the containing version.
    pub version_status: VersionStatus,
}

/// Chronological view of one service across `versions` (assumed sorted by
/// creation time ascending).
pub fn service_history(service: &str, versions: &[&Version]) -> Vec<ServiceHistoryEntry> {
    versions
        .iter()
        .filter_map(|v| {
            v.service(service).map(|s| ServiceHistoryEntry {
                version_id: v.id.clone(),
                created_at: v.created_at,
                service_version: s.version.clone(),
                artifact_fingerprint: s.artifact_fingerprint.clone(),
                version_status: v.status,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ServiceRecord, SystemDependencies, VersionMetadata};
    use crate::plan::RollbackPlan;

    fn version(id: &str, services: Vec<ServiceRecord>) -> Version {
        Version {
            id: id.to_string(),
            version: "1.0".to_string(),
            created_at: Utc::now(),
            services,
            metadata: VersionMetadata::default(),
            dependencies: SystemDependencies::default(),
            status: VersionStatus::Inactive,
            rollback_plan: RollbackPlan::empty(),
        }
    }

    fn service(name: &str, artifact: &str, config: &str) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            version: "1.0".to_string(),
            artifact_fingerprint: artifact.to_string(),
            config_fingerprint: config.to_string(),
            depends_on: vec![],
            health_endpoint: None,
            startup_timeout_secs: 30,
        }
    }

    #[test]
    fn detects_added_removed_modified() {
        let from = version(
            "v1",
            vec![service("a", "x1", "c1"), service("b", "x2", "c2")],
        );
        let to = version(
            "v2",
            vec![service("a", "x1-new", "c1"), service("c", "x3", "c3")],
        );

        let diff = diff(&from, &to);
        assert_eq!(diff.services.len(), 3);
        assert!(diff.services.iter().any(|c| matches!(
            c,
            ServiceChange::Modified { name, artifact_changed: true, config_changed: false, .. } if name == "a"
        )));
        assert!(diff
            .services
            .iter()
            .any(|c| matches!(c, ServiceChange::Added { name, .. } if name == "c")));
        assert!(diff
            .services
            .iter()
            .any(|c| matches!(c, ServiceChange::Removed { name } if name == "b")));
    }

    #[test]
    fn identical_versions_diff_empty() {
        let a = version("v1", vec![service("a", "x1", "c1")]);
        let mut b = a.clone();
        b.id = "v2".to_string();
        assert!(diff(&a, &b).is_empty());
    }

    #[test]
    fn dependency_delta() {
        let mut from = version("v1", vec![]);
        from.dependencies.runtimes.insert("rustc".into(), "1.77".into());
        let mut to = version("v2", vec![]);
        to.dependencies.runtimes.insert("rustc".into(), "1.78".into());
        to.dependencies.runtimes.insert("openssl".into(), "3.2".into());

        let diff = diff(&from, &to);
        assert_eq!(diff.runtimes.len(), 2);
    }
}
