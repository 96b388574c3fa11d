//! Version store behavior across process restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tradewind_versions::{
    NewVersion, RetentionPolicy, RollbackPlan, ServiceRecord, SystemDependencies, Version,
    VersionMetadata, VersionStatus, VersionStore,
};

fn service(name: &str) -> ServiceRecord {
    ServiceRecord {
        name: name.to_string(),
        version: "1.0".to_string(),
        artifact_fingerprint: format!("sha256:{name}"),
        config_fingerprint: format!("sha256:{name}-cfg"),
        depends_on: vec![],
        health_endpoint: None,
        startup_timeout_secs: 30,
    }
}

fn new_version(tag: &str, snapshot_root: Option<PathBuf>) -> NewVersion {
    NewVersion {
        version: tag.to_string(),
        services: vec![service("order-gateway"), service("risk-engine")],
        metadata: VersionMetadata {
            deployed_by: "ops".to_string(),
            reason: "release".to_string(),
            git_commit: Some("deadbeef".to_string()),
            environment: "production".to_string(),
            deploy_duration_ms: 25_000,
        },
        dependencies: SystemDependencies::default(),
        rollback_plan: RollbackPlan {
            instructions: Vec::new(),
            config_snapshot: None,
            artifact_snapshots: BTreeMap::new(),
            snapshot_root,
        },
    }
}

async fn open(dir: &Path, max: usize, policy: RetentionPolicy) -> VersionStore {
    VersionStore::open(dir, max, policy).await.unwrap()
}

#[tokio::test]
async fn full_lifecycle_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let (v1_id, v2_id, v3_id) = {
        let store = open(dir.path(), 10, RetentionPolicy::NeverDelete).await;
        let v1 = store.create(new_version("1.0.0", None)).await.unwrap();
        let v2 = store.create(new_version("1.1.0", None)).await.unwrap();
        let v3 = store.create(new_version("1.2.0", None)).await.unwrap();

        store.activate(&v1.id).await.unwrap();
        store.activate(&v3.id).await.unwrap();
        store.archive(&v2.id).await.unwrap();
        (v1.id, v2.id, v3.id)
    };

    // A fresh open reconstructs exactly the same view.
    let store = open(dir.path(), 10, RetentionPolicy::NeverDelete).await;
    assert_eq!(store.len().await, 3);
    assert_eq!(store.active().await.unwrap().id, v3_id);
    assert_eq!(
        store.get(&v1_id).await.unwrap().status,
        VersionStatus::Inactive
    );
    assert_eq!(
        store.get(&v2_id).await.unwrap().status,
        VersionStatus::Archived
    );

    // Targets exclude the active and the archived version.
    let targets = store.rollback_targets().await;
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].id, v1_id);
}

#[tokio::test]
async fn records_are_plain_json_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 10, RetentionPolicy::NeverDelete).await;
    let v = store.create(new_version("1.0.0", None)).await.unwrap();

    let path = dir.path().join(format!("{}.json", v.id));
    let raw = tokio::fs::read_to_string(&path).await.unwrap();
    let parsed: Version = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.id, v.id);
    assert_eq!(parsed.services.len(), 2);
    assert_eq!(parsed.metadata.git_commit.as_deref(), Some("deadbeef"));

    // No temp files left behind by the atomic write.
    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name();
        assert!(
            name.to_string_lossy().ends_with(".json"),
            "unexpected file {name:?}"
        );
    }
}

#[tokio::test]
async fn delete_removes_snapshot_tree() {
    let dir = tempfile::tempdir().unwrap();
    let snapshots = tempfile::tempdir().unwrap();
    let snapshot_root = snapshots.path().join("snap-1");
    tokio::fs::create_dir_all(snapshot_root.join("artifacts"))
        .await
        .unwrap();
    tokio::fs::write(snapshot_root.join("artifacts/binary"), b"v1")
        .await
        .unwrap();

    let store = open(dir.path(), 10, RetentionPolicy::NeverDelete).await;
    let v = store
        .create(new_version("1.0.0", Some(snapshot_root.clone())))
        .await
        .unwrap();

    store.delete(&v.id).await.unwrap();
    assert!(!snapshot_root.exists());
}

#[tokio::test]
async fn archive_then_delete_prunes_superseded_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let snapshots = tempfile::tempdir().unwrap();

    let store = open(dir.path(), 2, RetentionPolicy::ArchiveThenDelete).await;

    // A stream of deploy-then-activate releases, each with its own
    // snapshot tree. Older versions get archived past the ceiling and,
    // once superseded by newer snapshots, pruned entirely.
    let mut created = Vec::new();
    let mut snapshot_roots = Vec::new();
    for n in 0..5 {
        let snapshot_root = snapshots.path().join(format!("snap-{n}"));
        tokio::fs::create_dir_all(&snapshot_root).await.unwrap();
        tokio::fs::write(snapshot_root.join("marker"), n.to_string())
            .await
            .unwrap();
        let v = store
            .create(new_version(&format!("1.{n}.0"), Some(snapshot_root.clone())))
            .await
            .unwrap();
        store.activate(&v.id).await.unwrap();
        created.push(v.id.clone());
        snapshot_roots.push(snapshot_root);
    }

    // The latest version is active and survives everything.
    assert_eq!(store.active().await.unwrap().id, created[4]);

    // Non-archived count respects the ceiling.
    let non_archived = store
        .list()
        .await
        .into_iter()
        .filter(|v| v.status != VersionStatus::Archived)
        .count();
    assert!(non_archived <= 2);

    // The oldest archived release was pruned along with its snapshot.
    assert!(store.len().await < 5);
    assert!(store.get(&created[0]).await.is_err());
    assert!(!snapshot_roots[0].exists());
}
