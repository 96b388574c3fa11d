//! Composition root and orchestrator facade.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use tradewind_backup::{
    BackupCodec, BackupRecord, CleanupReport, IntegrityConfig, IntegrityRunReport,
    IntegrityTester, LocationHandle, LocationListing, ReplicationOutcome, Scheduler,
    SchedulerHandle, SourceSelector, StorageLocation, StorageManager, TrackConfig,
};
use tradewind_core::{Kinded, RetryPolicy};
use tradewind_drtest::{DrTestConfig, DrTestHarness, TestExecution};
use tradewind_events::{ControlEvent, EventBus, EventJournal, EventStream, JournalEntry};
use tradewind_ports::{
    AeadKey, Clock, CryptoProvider, HealthProbe, LocalFsStore, ObjectStore, PortResult,
    ProcessInfo, Supervisor, TimeoutProbe,
};
use tradewind_rollback::{
    ActionConfig, BlastRadius, DatabaseRestore, ExecutionPlan, ExecutorConfig, PortActionHandler,
    RollbackExecutor, RollbackResult, RunState, StepError,
};
use tradewind_versions::{
    NewVersion, RollbackPlan, ServiceHistoryEntry, ServiceRecord, SystemDependencies, Version,
    VersionDiff, VersionMetadata, VersionStore,
};

use crate::config::{ControlPlaneConfig, LocationConfig};
use crate::error::{ControlError, Result};
use crate::jobs::{DailyBackupJob, MonthlyDrTestJob, WeeklyIntegrityJob};

/// Factory producing remote object-store adapters; deployments supply
/// this when a location's kind is `object-store`.
pub type RemoteStoreFactory =
    Box<dyn Fn(&LocationConfig) -> PortResult<Arc<dyn ObjectStore>> + Send + Sync>;

/// The ports the composition root wires the core to.
pub struct PortSet {
    /// Process supervisor.
    pub supervisor: Arc<dyn Supervisor>,
    /// Health probe.
    pub probe: Arc<dyn HealthProbe>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
    /// Crypto primitives.
    pub crypto: Arc<dyn CryptoProvider>,
    /// Remote object-store adapters, when configured.
    pub remote_store_factory: Option<RemoteStoreFactory>,
}

/// Input to [`ControlPlane::create_version`].
#[derive(Debug, Clone)]
pub struct CreateVersionRequest {
    /// Human version string.
    pub version: String,
    /// Services as deployed.
    pub services: Vec<ServiceRecord>,
    /// Deployment metadata.
    pub metadata: VersionMetadata,
    /// System dependency snapshot.
    pub dependencies: SystemDependencies,
}

/// Aggregated view over every subsystem.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SystemStatus {
    /// Active version id, if any.
    pub active_version: Option<String>,
    /// Versions held by the store.
    pub version_count: usize,
    /// Rollback executor state.
    pub executor_state: RunState,
    /// Configured storage locations.
    pub locations: Vec<StorageLocation>,
    /// Distinct backups visible across locations.
    pub backups_visible: usize,
    /// Backups whose visible copies are below the configured minimum.
    pub under_replicated: usize,
    /// Latest integrity run pass/fail counts.
    pub last_integrity: Option<(usize, usize)>,
    /// Latest DR execution pass/fail counts.
    pub last_dr_test: Option<(usize, usize)>,
    /// Supervised processes.
    pub processes: Vec<ProcessInfo>,
    /// Events dropped by slow subscribers since start.
    pub dropped_events: u64,
}

/// The orchestrator facade.
///
/// Constructed exactly once per process by [`ControlPlane::new`] (tests
/// build a fresh one per case). Mutating operations (deploy, rollback,
/// DR test) share one lock and fail fast when it is taken.
pub struct ControlPlane {
    config: ControlPlaneConfig,
    bus: EventBus,
    key: AeadKey,
    versions: Arc<VersionStore>,
    codec: Arc<BackupCodec>,
    storage: Arc<StorageManager>,
    integrity: Arc<IntegrityTester>,
    executor: Arc<RollbackExecutor>,
    harness: Arc<DrTestHarness>,
    selector: SourceSelector,
    supervisor: Arc<dyn Supervisor>,
    clock: Arc<dyn Clock>,
    journal: EventJournal,
    mutating: tokio::sync::Mutex<()>,
}

impl ControlPlane {
    /// Builds every component from validated configuration and the
    /// supplied ports.
    pub async fn new(config: ControlPlaneConfig, ports: PortSet) -> Result<Arc<Self>> {
        config.validate()?;
        let key = config.aead_key()?;
        let bus = EventBus::default();

        let versions = Arc::new(
            VersionStore::open(
                &config.version_store.root,
                config.version_store.max_versions,
                config.version_store.retention_policy,
            )
            .await?,
        );

        let codec = Arc::new(BackupCodec::new(
            ports.crypto.clone(),
            config.backup.compression_level,
        )?);

        let mut handles = Vec::with_capacity(config.storage.locations.len());
        for location in &config.storage.locations {
            let store: Arc<dyn ObjectStore> = match location.kind {
                tradewind_backup::LocationKind::Local => {
                    Arc::new(LocalFsStore::new(&location.root))
                }
                tradewind_backup::LocationKind::ObjectStore => {
                    match &ports.remote_store_factory {
                        Some(factory) => factory(location)?,
                        None => {
                            return Err(ControlError::Configuration(format!(
                                "location {:?} needs a remote object-store adapter",
                                location.id
                            )))
                        }
                    }
                }
            };
            handles.push(LocationHandle {
                location: StorageLocation {
                    id: location.id.clone(),
                    kind: location.kind,
                    priority: location.priority,
                    enabled: location.enabled,
                },
                store,
            });
        }
        let storage = Arc::new(StorageManager::new(
            handles,
            config.storage.min_copies,
            config.storage.max_copies,
            ports.crypto.clone(),
        )?);

        let selector = SourceSelector::new(
            config.backup.source_roots.clone(),
            &config.backup.include_globs,
            &config.backup.exclude_globs,
        )?;

        let integrity = Arc::new(IntegrityTester::new(
            codec.clone(),
            storage.clone(),
            bus.clone(),
            IntegrityConfig {
                test_count: config.integrity.test_count,
                test_all_locations: config.integrity.test_all_locations,
                sandbox_root: config.integrity.sandbox_root.clone(),
                content_compare_max_bytes: config.integrity.content_compare_max_bytes,
                preserve_on_failure: config.dr_test.preserve_on_failure,
                history_limit: 24,
            },
        ));

        // Every probe consumer goes through the per-probe timeout.
        let probe: Arc<dyn HealthProbe> = Arc::new(TimeoutProbe::new(
            ports.probe.clone(),
            std::time::Duration::from_secs(2),
        ));

        let handler = Arc::new(
            PortActionHandler::new(
                ports.supervisor.clone(),
                probe.clone(),
                ActionConfig {
                    graceful_shutdown: std::time::Duration::from_secs(
                        config.rollback.graceful_shutdown_secs,
                    ),
                    probe_poll_interval: std::time::Duration::from_millis(500),
                    install_root: config.rollback.install_root.clone(),
                    config_root: config.rollback.config_root.clone(),
                },
            )
            .with_database_restore(Arc::new(StorageDatabaseRestore {
                storage: storage.clone(),
                codec: codec.clone(),
                key: key.clone(),
                default_target: config.rollback.install_root.join("database"),
            })),
        );

        let executor = Arc::new(RollbackExecutor::new(
            versions.clone(),
            ports.supervisor.clone(),
            probe.clone(),
            handler,
            bus.clone(),
            ExecutorConfig {
                overall_deadline: std::time::Duration::from_secs(
                    config.rollback.overall_deadline_secs,
                ),
                graceful_cancel_budget: std::time::Duration::from_secs(10),
                default_step_timeout: std::time::Duration::from_secs(
                    config.rollback.per_step_timeout_secs,
                ),
                parallel_groups_enabled: config.rollback.parallel_groups_enabled,
                auto_validate: config.rollback.auto_validate,
                step_retry: RetryPolicy::fixed(2, std::time::Duration::from_secs(1)),
            },
        ));

        let harness = Arc::new(DrTestHarness::new(
            executor.clone(),
            versions.clone(),
            ports.supervisor.clone(),
            probe,
            bus.clone(),
            DrTestConfig {
                dry_run: config.dr_test.dry_run,
                report_dir: config.dr_test.report_dir.clone(),
                report_formats: config.dr_test.report_formats.clone(),
                history_limit: 12,
            },
        ));

        let journal = EventJournal::attach(&bus, 256);

        info!("control plane composed");
        Ok(Arc::new(Self {
            config,
            bus,
            journal,
            key,
            versions,
            codec,
            storage,
            integrity,
            executor,
            harness,
            selector,
            supervisor: ports.supervisor,
            clock: ports.clock,
            mutating: tokio::sync::Mutex::new(()),
        }))
    }

    fn claim_mutating(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        self.mutating
            .try_lock()
            .map_err(|_| ControlError::OperationBusy)
    }

    /// Opens a subscription on the unified event bus.
    pub fn subscribe(&self, name: impl Into<String>) -> EventStream {
        self.bus.subscribe(name)
    }

    /// The unified event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The most recent control events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<JournalEntry> {
        self.journal.recent(limit)
    }

    // ------------------------------------------------------------------
    // Versions

    /// Records a new deployment version, capturing config and artifact
    /// snapshots for its rollback plan. Serialized with rollback and DR
    /// tests.
    pub async fn create_version(&self, request: CreateVersionRequest) -> Result<Version> {
        let _guard = self.claim_mutating()?;

        let snapshot_root = self
            .config
            .version_store
            .snapshot_root
            .join(format!("snap-{}", Uuid::new_v4()));

        let config_snapshot = {
            let destination = snapshot_root.join("config");
            if copy_tree_if_exists(&self.config.rollback.config_root, &destination).await? {
                Some(destination)
            } else {
                None
            }
        };

        let mut artifact_snapshots = BTreeMap::new();
        for service in &request.services {
            let source = self.config.rollback.install_root.join(&service.name);
            let destination = snapshot_root.join("artifacts").join(&service.name);
            if copy_tree_if_exists(&source, &destination).await? {
                artifact_snapshots.insert(service.name.clone(), destination);
            }
        }

        let plan = RollbackPlan::standard(
            &request.services,
            config_snapshot,
            artifact_snapshots,
            Some(snapshot_root),
        )?;

        let version = self
            .versions
            .create(NewVersion {
                version: request.version,
                services: request.services,
                metadata: request.metadata,
                dependencies: request.dependencies,
                rollback_plan: plan,
            })
            .await?;

        self.bus.publish(ControlEvent::VersionCreated {
            version_id: version.id.clone(),
            version: version.version.clone(),
        });
        Ok(version)
    }

    /// Activates a version directly (operator action, no plan execution).
    pub async fn activate_version(&self, id: &str) -> Result<Option<String>> {
        let previous = self.versions.activate(id).await?;
        self.bus.publish(ControlEvent::VersionActivated {
            version_id: id.to_string(),
            previous: previous.clone(),
        });
        Ok(previous)
    }

    /// Archives a non-active version.
    pub async fn archive_version(&self, id: &str) -> Result<()> {
        self.versions.archive(id).await?;
        self.bus.publish(ControlEvent::VersionArchived {
            version_id: id.to_string(),
        });
        Ok(())
    }

    /// All versions, newest first.
    pub async fn list_versions(&self) -> Vec<Version> {
        self.versions.list().await
    }

    /// One version by id.
    pub async fn get_version(&self, id: &str) -> Result<Version> {
        Ok(self.versions.get(id).await?)
    }

    /// Inactive versions eligible as rollback targets, newest first.
    pub async fn list_rollback_targets(&self) -> Vec<Version> {
        self.versions.rollback_targets().await
    }

    /// Structured difference between two versions.
    pub async fn compare_versions(&self, from: &str, to: &str) -> Result<VersionDiff> {
        Ok(self.versions.compare(from, to).await?)
    }

    /// Chronological appearances of one service.
    pub async fn service_history(&self, service: &str) -> Vec<ServiceHistoryEntry> {
        self.versions.service_history(service).await
    }

    // ------------------------------------------------------------------
    // Rollback

    /// Executes a rollback to `target_id`. Serialized with deploys and DR
    /// tests.
    pub async fn rollback(&self, target_id: &str) -> Result<RollbackResult> {
        let _guard = self.claim_mutating()?;
        Ok(self.executor.rollback(target_id).await?)
    }

    /// Dry-run: plans the rollback without mutating anything.
    pub async fn analyze_rollback(&self, target_id: &str) -> Result<ExecutionPlan> {
        Ok(self.executor.analyze(target_id).await?)
    }

    /// What rolling back to `target_id` would transitively affect.
    pub async fn rollback_blast_radius(&self, target_id: &str) -> Result<BlastRadius> {
        Ok(self.executor.blast_radius(target_id).await?)
    }

    /// Requests cancellation of the in-flight rollback.
    pub fn abort_rollback(&self) -> Result<()> {
        Ok(self.executor.abort()?)
    }

    // ------------------------------------------------------------------
    // Backup

    /// Runs a full backup now: select sources, encode, replicate.
    pub async fn create_backup(&self) -> Result<(BackupRecord, ReplicationOutcome)> {
        let cancel = CancellationToken::new();
        let files = self.selector.collect().await?;
        let encoded = self.codec.encode(&files, &self.key).await?;
        let mut record = encoded.record;

        self.bus.publish(ControlEvent::BackupStarted {
            backup_id: record.id.clone(),
        });

        let outcome = self
            .storage
            .store(&mut record, &encoded.blob, &cancel)
            .await?;

        if outcome.insufficient {
            self.bus.publish(ControlEvent::ReplicationDegraded {
                backup_id: record.id.clone(),
                copies: outcome.copies.len(),
                min_copies: outcome.min_copies,
            });
        }
        self.bus.publish(ControlEvent::BackupCompleted {
            backup_id: record.id.clone(),
            copies: outcome.copies.len(),
            insufficient: outcome.insufficient,
        });

        Ok((record, outcome))
    }

    /// Restores a backup into `target` (defaults to
    /// `restored/<backupId>` under the install root).
    pub async fn restore_backup(
        &self,
        backup_id: &str,
        target: Option<PathBuf>,
    ) -> Result<Vec<PathBuf>> {
        let record = self
            .find_backup(backup_id)
            .await?
            .ok_or_else(|| ControlError::NotFound(format!("backup {backup_id}")))?;
        let blob = self.storage.retrieve(&record).await?;
        let destination = target.unwrap_or_else(|| {
            self.config
                .rollback
                .install_root
                .join("restored")
                .join(backup_id)
        });
        let restored = self
            .codec
            .decode(&blob, &record.blob_hash, &self.key, &destination)
            .await?;
        self.bus.publish(ControlEvent::BackupRestored {
            backup_id: backup_id.to_string(),
        });
        Ok(restored)
    }

    /// Per-location listing of visible backups.
    pub async fn list_backups(&self) -> Vec<LocationListing> {
        self.storage.list().await
    }

    /// Applies per-location retention now.
    pub async fn cleanup_backups(&self) -> Result<CleanupReport> {
        let cancel = CancellationToken::new();
        Ok(self
            .storage
            .cleanup(
                chrono::Duration::days(self.config.backup.retention_days as i64),
                &cancel,
            )
            .await?)
    }

    async fn find_backup(&self, backup_id: &str) -> Result<Option<BackupRecord>> {
        for listing in self.storage.list().await {
            if let Some(record) = listing.records.into_iter().find(|r| r.id == backup_id) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Integrity

    /// Runs an integrity pass now. The tester publishes the run's
    /// started/completed events on the unified bus.
    pub async fn run_integrity_tests(&self) -> Result<IntegrityRunReport> {
        let cancel = CancellationToken::new();
        Ok(self.integrity.run(&self.key, &cancel).await?)
    }

    /// Past integrity runs, oldest first.
    pub async fn integrity_history(&self) -> Vec<IntegrityRunReport> {
        self.integrity.history().await
    }

    // ------------------------------------------------------------------
    // DR tests

    /// Runs the configured DR scenarios now. Serialized with deploys and
    /// rollbacks. With no scenarios configured, the standard suite over
    /// the active version's services is rehearsed instead.
    pub async fn run_dr_test(&self) -> Result<TestExecution> {
        let _guard = self.claim_mutating()?;
        let cancel = CancellationToken::new();

        let scenarios = if self.config.dr_test.scenarios.is_empty() {
            let services: Vec<String> = match self.versions.active().await {
                Some(active) => active.services.iter().map(|s| s.name.clone()).collect(),
                None => Vec::new(),
            };
            let names: Vec<&str> = services.iter().map(String::as_str).collect();
            tradewind_drtest::templates::standard_suite(&names)
        } else {
            self.config.dr_test.scenarios.clone()
        };

        Ok(self.harness.run(&scenarios, &cancel).await?)
    }

    /// The most recent DR execution.
    pub async fn dr_test_status(&self) -> Option<TestExecution> {
        self.harness.latest().await
    }

    /// One past DR execution by id.
    pub async fn dr_test_report(&self, execution_id: &str) -> Result<TestExecution> {
        Ok(self.harness.get(execution_id).await?)
    }

    // ------------------------------------------------------------------
    // Scheduler & status

    /// Starts the three periodic tracks. The returned handle owns their
    /// lifetime.
    pub fn start_scheduler(self: &Arc<Self>) -> Result<SchedulerHandle> {
        let scheduler = Scheduler::new(self.clock.clone(), self.bus.clone());
        let retry = RetryPolicy::fixed(3, std::time::Duration::from_secs(60));
        let tracks: Vec<(TrackConfig, Arc<dyn tradewind_backup::ScheduledJob>)> = vec![
            (
                TrackConfig {
                    name: "daily-backup".to_string(),
                    cadence: self.config.daily_backup_cadence()?,
                    retry: retry.clone(),
                },
                Arc::new(DailyBackupJob::new(self.clone())),
            ),
            (
                TrackConfig {
                    name: "weekly-integrity".to_string(),
                    cadence: self.config.weekly_integrity_cadence()?,
                    retry: retry.clone(),
                },
                Arc::new(WeeklyIntegrityJob::new(self.clone())),
            ),
            (
                TrackConfig {
                    name: "monthly-dr-test".to_string(),
                    cadence: self.config.monthly_dr_cadence()?,
                    retry,
                },
                Arc::new(MonthlyDrTestJob::new(self.clone())),
            ),
        ];
        Ok(scheduler.start(tracks))
    }

    /// Aggregated status across every subsystem.
    pub async fn system_status(&self) -> SystemStatus {
        let storage_stats = self.storage.statistics().await;

        let last_integrity = self
            .integrity
            .history()
            .await
            .last()
            .map(|r| (r.passed, r.failed));
        let last_dr_test = self
            .harness
            .latest()
            .await
            .map(|e| (e.metrics.passed, e.metrics.failed));

        let processes = match self.supervisor.list_processes().await {
            Ok(processes) => processes,
            Err(e) => {
                warn!(error = %e, "supervisor unavailable for status");
                Vec::new()
            }
        };

        SystemStatus {
            active_version: self.versions.active().await.map(|v| v.id),
            version_count: self.versions.len().await,
            executor_state: self.executor.state(),
            locations: self.storage.locations(),
            backups_visible: storage_stats.unique_backups,
            under_replicated: storage_stats.under_replicated,
            last_integrity,
            last_dr_test,
            processes,
            dropped_events: self.bus.dropped_events(),
        }
    }
}

/// Restores database backups through the storage manager for
/// restore-database rollback steps.
struct StorageDatabaseRestore {
    storage: Arc<StorageManager>,
    codec: Arc<BackupCodec>,
    key: AeadKey,
    default_target: PathBuf,
}

#[async_trait::async_trait]
impl DatabaseRestore for StorageDatabaseRestore {
    async fn restore(
        &self,
        target: &str,
        params: &BTreeMap<String, String>,
        _cancel: &CancellationToken,
    ) -> std::result::Result<(), StepError> {
        let record = {
            let mut found = None;
            for listing in self.storage.list().await {
                if let Some(record) = listing.records.into_iter().find(|r| r.id == target) {
                    found = Some(record);
                    break;
                }
            }
            found.ok_or_else(|| {
                StepError::new(
                    tradewind_core::ErrorKind::NotFound,
                    format!("backup {target} not found at any location"),
                )
            })?
        };

        let blob = self
            .storage
            .retrieve(&record)
            .await
            .map_err(|e| StepError::new(e.kind(), e.to_string()))?;

        let destination = params
            .get("target_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_target.clone());
        self.codec
            .decode(&blob, &record.blob_hash, &self.key, &destination)
            .await
            .map_err(|e| StepError::new(e.kind(), e.to_string()))?;
        Ok(())
    }
}

/// Copies `from` into `to` when `from` exists; returns whether anything
/// was copied.
async fn copy_tree_if_exists(from: &Path, to: &Path) -> Result<bool> {
    if tokio::fs::metadata(from).await.is_err() {
        return Ok(false);
    }
    let mut copied_any = false;
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
                .expect("walk stays under the source root");
            let destination = to.join(rel);
            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&path, &destination).await?;
            copied_any = true;
        }
    }
    Ok(copied_any)
}
