//! Directory-backed version store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::compare::{self, ServiceHistoryEntry, VersionDiff};
use crate::error::{Result, VersionError};
use crate::model::{ServiceRecord, SystemDependencies, Version, VersionMetadata, VersionStatus};
use crate::plan::RollbackPlan;

/// What happens to versions past the retention ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetentionPolicy {
    /// Archive first; delete an archived version once a newer version with
    /// its own snapshot exists, so its backups are no longer the only
    /// restore path.
    ArchiveThenDelete,
    /// Archive but never delete.
    NeverDelete,
}

/// Input to [`VersionStore::create`].
#[derive(Debug, Clone)]
pub struct NewVersion {
    /// Human version string.
    pub version: String,
    /// Ordered service snapshots.
    pub services: Vec<ServiceRecord>,
    /// Deployment metadata.
    pub metadata: VersionMetadata,
    /// System dependency snapshot.
    pub dependencies: SystemDependencies,
    /// Executable rollback plan.
    pub rollback_plan: RollbackPlan,
}

#[derive(Debug, Default)]
struct StoreState {
    versions: HashMap<String, Version>,
    active: Option<String>,
}

/// Persists version records, one JSON file per record, and enforces the
/// single-active invariant.
///
/// Reads take a shared lock; every mutation holds the store-wide write
/// lock, which also makes activation atomic.
#[derive(Debug)]
pub struct VersionStore {
    root: PathBuf,
    max_versions: usize,
    retention: RetentionPolicy,
    state: RwLock<StoreState>,
}

impl VersionStore {
    /// Opens (or initializes) a store under `root`.
    ///
    /// Fails closed with [`VersionError::CorruptStore`] when more than one
    /// record claims active status; the operator must repair the records
    /// on disk before the control plane will start.
    pub async fn open(
        root: impl Into<PathBuf>,
        max_versions: usize,
        retention: RetentionPolicy,
    ) -> Result<Self> {
        let root = root.into();
        if max_versions == 0 {
            return Err(VersionError::InvalidArgument(
                "maxVersions must be at least 1".to_string(),
            ));
        }
        tokio::fs::create_dir_all(&root).await?;

        let mut state = StoreState::default();
        let mut active_ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let version = Self::load_record(&path).await?;
            if version.status == VersionStatus::Active {
                active_ids.push(version.id.clone());
            }
            state.versions.insert(version.id.clone(), version);
        }

        match active_ids.len() {
            0 => {}
            1 => state.active = Some(active_ids[0].clone()),
            _ => {
                active_ids.sort();
                return Err(VersionError::CorruptStore { active_ids });
            }
        }

        info!(
            root = %root.display(),
            versions = state.versions.len(),
            active = state.active.as_deref().unwrap_or("none"),
            "version store opened"
        );

        Ok(Self {
            root,
            max_versions,
            retention,
            state: RwLock::new(state),
        })
    }

    async fn load_record(path: &Path) -> Result<Version> {
        let data = tokio::fs::read(path).await?;
        serde_json::from_slice(&data).map_err(|e| VersionError::InvalidRecord {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Atomic record write: temp file, fsync, rename.
    async fn persist(&self, version: &Version) -> Result<()> {
        let path = self.record_path(&version.id);
        let tmp = self.root.join(format!("{}.json.tmp", version.id));
        let data = serde_json::to_vec_pretty(version)?;
        tokio::fs::write(&tmp, &data).await?;
        let file = tokio::fs::File::open(&tmp).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn fresh_id(state: &StoreState) -> String {
        loop {
            let mut suffix = [0u8; 3];
            rand::rngs::OsRng.fill_bytes(&mut suffix);
            let id = format!(
                "v-{}-{:02x}{:02x}{:02x}",
                Utc::now().format("%Y%m%d%H%M%S"),
                suffix[0],
                suffix[1],
                suffix[2]
            );
            if !state.versions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Creates a new inactive version record and applies retention.
    pub async fn create(&self, new: NewVersion) -> Result<Version> {
        if new.version.trim().is_empty() {
            return Err(VersionError::InvalidArgument(
                "version string must not be empty".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let id = Self::fresh_id(&state);
        let version = Version {
            id: id.clone(),
            version: new.version,
            created_at: Utc::now(),
            services: new.services,
            metadata: new.metadata,
            dependencies: new.dependencies,
            status: VersionStatus::Inactive,
            rollback_plan: new.rollback_plan,
        };

        self.persist(&version).await?;
        state.versions.insert(id.clone(), version.clone());
        info!(version_id = %id, version = %version.version, "version created");

        self.apply_retention(&mut state).await?;
        Ok(version)
    }

    /// Archives the oldest non-active versions until the non-archived
    /// count fits the ceiling, then (policy permitting) deletes archived
    /// versions whose snapshots are superseded by a newer version.
    async fn apply_retention(&self, state: &mut StoreState) -> Result<()> {
        loop {
            let non_archived: Vec<&Version> = state
                .versions
                .values()
                .filter(|v| v.status != VersionStatus::Archived)
                .collect();
            if non_archived.len() <= self.max_versions {
                break;
            }
            let oldest = non_archived
                .iter()
                .filter(|v| v.status != VersionStatus::Active)
                .min_by_key(|v| v.created_at)
                .map(|v| v.id.clone());
            let Some(oldest_id) = oldest else { break };

            let mut archived = state.versions.get(&oldest_id).cloned().ok_or_else(|| {
                VersionError::NotFound(oldest_id.clone())
            })?;
            archived.status = VersionStatus::Archived;
            self.persist(&archived).await?;
            info!(version_id = %oldest_id, "version archived by retention");
            state.versions.insert(oldest_id, archived);
        }

        if self.retention == RetentionPolicy::NeverDelete {
            return Ok(());
        }

        // An archived version may be deleted once a strictly newer,
        // non-archived version carries its own snapshot tree: at that
        // point the archived backups are no longer the only restore path.
        let newest_snapshot_at = state
            .versions
            .values()
            .filter(|v| {
                v.status != VersionStatus::Archived && v.rollback_plan.snapshot_root.is_some()
            })
            .map(|v| v.created_at)
            .max();
        let Some(cutoff) = newest_snapshot_at else {
            return Ok(());
        };

        let mut archived: Vec<&Version> = state
            .versions
            .values()
            .filter(|v| v.status == VersionStatus::Archived && v.created_at < cutoff)
            .collect();
        archived.sort_by_key(|v| v.created_at);
        // Keep the most recent ceiling's worth of archived history for audit.
        let excess = archived.len().saturating_sub(self.max_versions);
        let doomed: Vec<String> = archived
            .iter()
            .take(excess)
            .map(|v| v.id.clone())
            .collect();
        drop(archived);

        for id in doomed {
            self.remove_record(state, &id).await?;
            info!(version_id = %id, "archived version pruned by retention");
        }
        Ok(())
    }

    async fn remove_record(&self, state: &mut StoreState, id: &str) -> Result<()> {
        let version = state
            .versions
            .remove(id)
            .ok_or_else(|| VersionError::NotFound(id.to_string()))?;
        match tokio::fs::remove_file(self.record_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                state.versions.insert(id.to_string(), version);
                return Err(e.into());
            }
        }
        if let Some(snapshot_root) = &version.rollback_plan.snapshot_root {
            if let Err(e) = tokio::fs::remove_dir_all(snapshot_root).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        version_id = %id,
                        path = %snapshot_root.display(),
                        error = %e,
                        "failed to remove snapshot tree"
                    );
                }
            }
        }
        Ok(())
    }

    /// Atomically swaps the active version: the previously active record
    /// becomes inactive, the target becomes active. The in-memory view only
    /// changes when both records persisted.
    pub async fn activate(&self, id: &str) -> Result<Option<String>> {
        let mut state = self.state.write().await;

        let target = state
            .versions
            .get(id)
            .ok_or_else(|| VersionError::NotFound(id.to_string()))?;
        match target.status {
            VersionStatus::Active => return Err(VersionError::AlreadyActive(id.to_string())),
            VersionStatus::Archived => {
                return Err(VersionError::InvalidArgument(format!(
                    "version {id} is archived and cannot be activated"
                )))
            }
            VersionStatus::Inactive => {}
        }

        let previous_id = state.active.clone();
        let mut new_target = target.clone();
        new_target.status = VersionStatus::Active;

        // Deactivate-first ordering: a crash between the two writes leaves
        // zero active versions, which the store accepts on restart. The
        // reverse order could leave two.
        if let Some(prev_id) = &previous_id {
            let prev = state
                .versions
                .get(prev_id)
                .ok_or_else(|| VersionError::NotFound(prev_id.clone()))?;
            let mut demoted = prev.clone();
            demoted.status = VersionStatus::Inactive;
            self.persist(&demoted).await?;

            if let Err(e) = self.persist(&new_target).await {
                // Roll the on-disk demotion back so the store view stays
                // consistent with memory.
                let _ = self.persist(prev).await;
                return Err(e);
            }
            state.versions.insert(prev_id.clone(), demoted);
        } else {
            self.persist(&new_target).await?;
        }

        state.versions.insert(id.to_string(), new_target);
        state.active = Some(id.to_string());
        info!(
            version_id = %id,
            previous = previous_id.as_deref().unwrap_or("none"),
            "version activated"
        );
        Ok(previous_id)
    }

    /// Fetches one version.
    pub async fn get(&self, id: &str) -> Result<Version> {
        let state = self.state.read().await;
        state
            .versions
            .get(id)
            .cloned()
            .ok_or_else(|| VersionError::NotFound(id.to_string()))
    }

    /// The currently active version, if any.
    pub async fn active(&self) -> Option<Version> {
        let state = self.state.read().await;
        state
            .active
            .as_ref()
            .and_then(|id| state.versions.get(id))
            .cloned()
    }

    /// All versions, newest first.
    pub async fn list(&self) -> Vec<Version> {
        let state = self.state.read().await;
        let mut versions: Vec<Version> = state.versions.values().cloned().collect();
        versions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        versions
    }

    /// Versions eligible as rollback targets (inactive), newest first.
    pub async fn rollback_targets(&self) -> Vec<Version> {
        self.list()
            .await
            .into_iter()
            .filter(Version::is_rollback_target)
            .collect()
    }

    /// Archives a non-active version.
    pub async fn archive(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let version = state
            .versions
            .get(id)
            .ok_or_else(|| VersionError::NotFound(id.to_string()))?;
        if version.status == VersionStatus::Active {
            return Err(VersionError::ActiveProtected(id.to_string(), "archived"));
        }
        if version.status == VersionStatus::Archived {
            return Ok(());
        }
        let mut archived = version.clone();
        archived.status = VersionStatus::Archived;
        self.persist(&archived).await?;
        state.versions.insert(id.to_string(), archived);
        info!(version_id = %id, "version archived");
        Ok(())
    }

    /// Deletes a non-active version record and its snapshot tree.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let version = state
            .versions
            .get(id)
            .ok_or_else(|| VersionError::NotFound(id.to_string()))?;
        if version.status == VersionStatus::Active {
            return Err(VersionError::ActiveProtected(id.to_string(), "deleted"));
        }
        self.remove_record(&mut state, id).await?;
        info!(version_id = %id, "version deleted");
        Ok(())
    }

    /// Structured difference between two versions.
    pub async fn compare(&self, from_id: &str, to_id: &str) -> Result<VersionDiff> {
        let state = self.state.read().await;
        let from = state
            .versions
            .get(from_id)
            .ok_or_else(|| VersionError::NotFound(from_id.to_string()))?;
        let to = state
            .versions
            .get(to_id)
            .ok_or_else(|| VersionError::NotFound(to_id.to_string()))?;
        Ok(compare::diff(from, to))
    }

    /// Chronological appearances of one service across all versions.
    pub async fn service_history(&self, service: &str) -> Vec<ServiceHistoryEntry> {
        let state = self.state.read().await;
        let mut versions: Vec<&Version> = state.versions.values().collect();
        versions.sort_by_key(|v| v.created_at);
        compare::service_history(service, &versions)
    }

    /// Count of versions currently held (all statuses).
    pub async fn len(&self) -> usize {
        self.state.read().await.versions.len()
    }

    /// Whether the store holds no versions.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn new_version(tag: &str) -> NewVersion {
        NewVersion {
            version: tag.to_string(),
            services: vec![ServiceRecord {
                name: "order-gateway".to_string(),
                version: tag.to_string(),
                artifact_fingerprint: format!("sha256:{tag}"),
                config_fingerprint: format!("sha256:{tag}-cfg"),
                depends_on: vec![],
                health_endpoint: None,
                startup_timeout_secs: 30,
            }],
            metadata: VersionMetadata {
                deployed_by: "ops".to_string(),
                reason: "test".to_string(),
                git_commit: None,
                environment: "test".to_string(),
                deploy_duration_ms: 1000,
            },
            dependencies: SystemDependencies::default(),
            rollback_plan: RollbackPlan::empty(),
        }
    }

    async fn open_store(dir: &Path) -> VersionStore {
        VersionStore::open(dir, 10, RetentionPolicy::NeverDelete)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let v = store.create(new_version("1.0.0")).await.unwrap();
        assert_eq!(v.status, VersionStatus::Inactive);

        // Fresh store instance sees the persisted record.
        let reopened = open_store(dir.path()).await;
        let loaded = reopened.get(&v.id).await.unwrap();
        assert_eq!(loaded.version, "1.0.0");
        assert_eq!(loaded.services.len(), 1);
    }

    #[tokio::test]
    async fn activation_swaps_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let v1 = store.create(new_version("1.0.0")).await.unwrap();
        let v2 = store.create(new_version("1.1.0")).await.unwrap();

        assert_eq!(store.activate(&v1.id).await.unwrap(), None);
        assert_eq!(store.activate(&v2.id).await.unwrap(), Some(v1.id.clone()));

        let active = store.active().await.unwrap();
        assert_eq!(active.id, v2.id);
        assert_eq!(
            store.get(&v1.id).await.unwrap().status,
            VersionStatus::Inactive
        );

        // Exactly one active after reload.
        let reopened = open_store(dir.path()).await;
        assert_eq!(reopened.active().await.unwrap().id, v2.id);
    }

    #[tokio::test]
    async fn activating_active_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let v = store.create(new_version("1.0.0")).await.unwrap();
        store.activate(&v.id).await.unwrap();
        assert!(matches!(
            store.activate(&v.id).await,
            Err(VersionError::AlreadyActive(_))
        ));
    }

    #[tokio::test]
    async fn active_version_protected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let v = store.create(new_version("1.0.0")).await.unwrap();
        store.activate(&v.id).await.unwrap();

        assert!(store.archive(&v.id).await.is_err());
        assert!(store.delete(&v.id).await.is_err());
    }

    #[tokio::test]
    async fn corrupt_store_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(dir.path()).await;
            let v1 = store.create(new_version("1.0.0")).await.unwrap();
            let v2 = store.create(new_version("1.1.0")).await.unwrap();
            store.activate(&v1.id).await.unwrap();

            // Corrupt the second record on disk to also claim active.
            let path = dir.path().join(format!("{}.json", v2.id));
            let mut record: Version =
                serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
            record.status = VersionStatus::Active;
            std::fs::write(&path, serde_json::to_vec_pretty(&record).unwrap()).unwrap();
        }

        let result = VersionStore::open(dir.path(), 10, RetentionPolicy::NeverDelete).await;
        match result {
            Err(VersionError::CorruptStore { active_ids }) => assert_eq!(active_ids.len(), 2),
            other => panic!("expected corrupt store, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retention_archives_oldest_non_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::open(dir.path(), 1, RetentionPolicy::NeverDelete)
            .await
            .unwrap();

        let v1 = store.create(new_version("1.0.0")).await.unwrap();
        store.activate(&v1.id).await.unwrap();
        let v2 = store.create(new_version("1.1.0")).await.unwrap();
        let _v3 = store.create(new_version("1.2.0")).await.unwrap();

        // The active version is never archived; the oldest inactive is.
        assert_eq!(
            store.get(&v1.id).await.unwrap().status,
            VersionStatus::Active
        );
        assert_eq!(
            store.get(&v2.id).await.unwrap().status,
            VersionStatus::Archived
        );
    }

    #[tokio::test]
    async fn archived_versions_are_not_targets() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let v1 = store.create(new_version("1.0.0")).await.unwrap();
        let v2 = store.create(new_version("1.1.0")).await.unwrap();
        store.archive(&v1.id).await.unwrap();

        let targets = store.rollback_targets().await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, v2.id);
    }

    #[tokio::test]
    async fn create_activate_archive_preserves_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let v1 = store.create(new_version("1.0.0")).await.unwrap();
        let v2 = store.create(new_version("1.1.0")).await.unwrap();

        store.activate(&v1.id).await.unwrap();
        store.activate(&v2.id).await.unwrap();
        store.archive(&v1.id).await.unwrap();

        let after = store.get(&v1.id).await.unwrap();
        assert_eq!(after.version, v1.version);
        assert_eq!(after.services, v1.services);
        assert_eq!(after.created_at, v1.created_at);
        assert_eq!(after.status, VersionStatus::Archived);
    }

    #[tokio::test]
    async fn delete_removes_record_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let v = store.create(new_version("1.0.0")).await.unwrap();
        store.delete(&v.id).await.unwrap();

        assert!(matches!(
            store.get(&v.id).await,
            Err(VersionError::NotFound(_))
        ));
        assert!(!dir.path().join(format!("{}.json", v.id)).exists());
    }

    #[tokio::test]
    async fn max_versions_zero_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            VersionStore::open(dir.path(), 0, RetentionPolicy::NeverDelete)
                .await
                .is_err()
        );
    }
}
