//! Integrity tester: restore backups into a sandbox and compare.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use tradewind_core::{ErrorKind, Kinded};
use tradewind_events::{ControlEvent, EventBus};
use tradewind_ports::AeadKey;

use crate::codec::BackupCodec;
use crate::error::{BackupError, Result};
use crate::record::BackupRecord;
use crate::storage::StorageManager;

/// Integrity tester configuration.
#[derive(Debug, Clone)]
pub struct IntegrityConfig {
    /// How many recent backups each run covers.
    pub test_count: usize,
    /// Test every location holding a copy, or only the preferred one.
    pub test_all_locations: bool,
    /// Directory test sandboxes are created under.
    pub sandbox_root: PathBuf,
    /// Files at or below this size are compared byte for byte.
    pub content_compare_max_bytes: u64,
    /// Keep the sandbox of a failed case for post-mortem.
    pub preserve_on_failure: bool,
    /// Bounded run-report history length.
    pub history_limit: usize,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            test_count: 3,
            test_all_locations: true,
            sandbox_root: PathBuf::from("integrity-sandbox"),
            content_compare_max_bytes: 16 * 1024 * 1024,
            preserve_on_failure: false,
            history_limit: 24,
        }
    }
}

/// Why a test case failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CaseFailure {
    /// Record failed structural validation.
    Metadata(String),
    /// Stored blob did not hash to the recorded value. Decryption is not
    /// attempted after this.
    ChecksumMismatch,
    /// The blob could not be fetched from the location.
    Retrieval {
        /// Failure description.
        message: String,
    },
    /// Decode failed after a verified fetch.
    Decode {
        /// Taxonomy kind (decrypt-failed, decompress-failed, ...).
        kind: ErrorKind,
        /// Failure description.
        message: String,
    },
    /// A recorded file was not restored.
    MissingFile(PathBuf),
    /// A restored file's size differs from the recorded size.
    SizeMismatch {
        /// Relative path.
        path: PathBuf,
        /// Size recorded at backup time.
        expected: u64,
        /// Size actually restored.
        actual: u64,
    },
    /// Restored bytes differ from the original file.
    ContentMismatch(PathBuf),
}

/// One backup × location test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityCase {
    /// Backup under test.
    pub backup_id: String,
    /// Location the copy was fetched from.
    pub location_id: String,
    /// Whether every step passed.
    pub passed: bool,
    /// First failure, when one occurred.
    pub failure: Option<CaseFailure>,
    /// Files whose existence and size were checked.
    pub files_checked: usize,
    /// Files additionally compared byte for byte.
    pub files_byte_compared: usize,
    /// Case duration.
    pub duration_ms: u64,
}

/// Report of one integrity run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityRunReport {
    /// Run id.
    pub run_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
    /// Individual cases.
    pub cases: Vec<IntegrityCase>,
    /// Cases that passed.
    pub passed: usize,
    /// Cases that failed.
    pub failed: usize,
}

/// Restores recent backups into per-test sandboxes and compares the
/// result against the originals.
pub struct IntegrityTester {
    codec: Arc<BackupCodec>,
    manager: Arc<StorageManager>,
    bus: EventBus,
    config: IntegrityConfig,
    history: RwLock<VecDeque<IntegrityRunReport>>,
}

impl IntegrityTester {
    /// Creates a tester over the given codec and storage manager.
    pub fn new(
        codec: Arc<BackupCodec>,
        manager: Arc<StorageManager>,
        bus: EventBus,
        config: IntegrityConfig,
    ) -> Self {
        Self {
            codec,
            manager,
            bus,
            config,
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// Runs one integrity pass over the most recent backups.
    pub async fn run(
        &self,
        key: &AeadKey,
        cancel: &CancellationToken,
    ) -> Result<IntegrityRunReport> {
        let run_id = format!("it-{}", Uuid::new_v4());
        let started_at = Utc::now();
        self.bus.publish(ControlEvent::IntegrityRunStarted {
            run_id: run_id.clone(),
        });

        // Collect every record visible anywhere, with the locations that
        // hold it, newest first.
        let listings = self.manager.list().await;
        let mut by_id: HashMap<String, (BackupRecord, Vec<String>)> = HashMap::new();
        for listing in &listings {
            for record in &listing.records {
                by_id
                    .entry(record.id.clone())
                    .or_insert_with(|| (record.clone(), Vec::new()))
                    .1
                    .push(listing.location_id.clone());
            }
        }
        let mut records: Vec<(BackupRecord, Vec<String>)> = by_id.into_values().collect();
        records.sort_by(|a, b| b.0.created_at.cmp(&a.0.created_at));
        records.truncate(self.config.test_count);

        let mut case_futures = Vec::new();
        for (record, locations) in records {
            let chosen: Vec<String> = if self.config.test_all_locations {
                locations
            } else {
                locations.into_iter().take(1).collect()
            };
            for location_id in chosen {
                if cancel.is_cancelled() {
                    return Err(BackupError::Cancelled);
                }
                let record = record.clone();
                let run_id = run_id.clone();
                case_futures.push(async move {
                    self.run_case(&record, &location_id, key, &run_id).await
                });
            }
        }

        let cases = futures::future::join_all(case_futures).await;
        let passed = cases.iter().filter(|c| c.passed).count();
        let failed = cases.len() - passed;

        let report = IntegrityRunReport {
            run_id: run_id.clone(),
            started_at,
            completed_at: Utc::now(),
            cases,
            passed,
            failed,
        };

        info!(
            run_id = %run_id,
            passed,
            failed,
            "integrity run complete"
        );
        self.bus.publish(ControlEvent::IntegrityRunCompleted {
            run_id: run_id.clone(),
            passed,
            failed,
        });

        let mut history = self.history.write().await;
        history.push_back(report.clone());
        while history.len() > self.config.history_limit {
            history.pop_front();
        }

        Ok(report)
    }

    /// Recent run reports, oldest first.
    pub async fn history(&self) -> Vec<IntegrityRunReport> {
        self.history.read().await.iter().cloned().collect()
    }

    async fn run_case(
        &self,
        record: &BackupRecord,
        location_id: &str,
        key: &AeadKey,
        run_id: &str,
    ) -> IntegrityCase {
        let started = std::time::Instant::now();
        let mut case = IntegrityCase {
            backup_id: record.id.clone(),
            location_id: location_id.to_string(),
            passed: false,
            failure: None,
            files_checked: 0,
            files_byte_compared: 0,
            duration_ms: 0,
        };

        let failure = self.execute_case(record, location_id, key, run_id, &mut case).await;
        case.passed = failure.is_none();
        case.failure = failure;
        case.duration_ms = started.elapsed().as_millis() as u64;
        if !case.passed {
            warn!(
                backup_id = %case.backup_id,
                location = %case.location_id,
                failure = ?case.failure,
                "integrity case failed"
            );
        }
        case
    }

    async fn execute_case(
        &self,
        record: &BackupRecord,
        location_id: &str,
        key: &AeadKey,
        run_id: &str,
        case: &mut IntegrityCase,
    ) -> Option<CaseFailure> {
        if let Err(e) = record.validate() {
            return Some(CaseFailure::Metadata(e.to_string()));
        }

        let blob = match self.manager.retrieve_from(location_id, record).await {
            Ok(blob) => blob,
            Err(BackupError::ChecksumMismatch { .. }) => {
                return Some(CaseFailure::ChecksumMismatch)
            }
            Err(e) => {
                return Some(CaseFailure::Retrieval {
                    message: e.to_string(),
                })
            }
        };

        let sandbox = self
            .config
            .sandbox_root
            .join(format!("{run_id}-{}-{location_id}", record.id));
        let decode_result = self
            .codec
            .decode(&blob, &record.blob_hash, key, &sandbox)
            .await;

        let failure = match decode_result {
            Err(e) => Some(CaseFailure::Decode {
                kind: e.kind(),
                message: e.to_string(),
            }),
            Ok(_) => self.compare_files(record, &sandbox, case).await,
        };

        let keep_sandbox = failure.is_some() && self.config.preserve_on_failure;
        if !keep_sandbox {
            if let Err(e) = tokio::fs::remove_dir_all(&sandbox).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %sandbox.display(), error = %e, "sandbox cleanup failed");
                }
            }
        }

        failure
    }

    async fn compare_files(
        &self,
        record: &BackupRecord,
        sandbox: &std::path::Path,
        case: &mut IntegrityCase,
    ) -> Option<CaseFailure> {
        for file in &record.source_files {
            let restored = sandbox.join(&file.relative);
            let meta = match tokio::fs::metadata(&restored).await {
                Ok(meta) => meta,
                Err(_) => return Some(CaseFailure::MissingFile(file.relative.clone())),
            };
            case.files_checked += 1;

            if meta.len() != file.size {
                return Some(CaseFailure::SizeMismatch {
                    path: file.relative.clone(),
                    expected: file.size,
                    actual: meta.len(),
                });
            }

            if file.size <= self.config.content_compare_max_bytes {
                // Originals can legitimately disappear between backup and
                // audit; only compare when one is still there.
                if let Ok(original) = tokio::fs::read(&file.original).await {
                    let restored_bytes = match tokio::fs::read(&restored).await {
                        Ok(bytes) => bytes,
                        Err(_) => return Some(CaseFailure::MissingFile(file.relative.clone())),
                    };
                    if original != restored_bytes {
                        return Some(CaseFailure::ContentMismatch(file.relative.clone()));
                    }
                    case.files_byte_compared += 1;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceFile;
    use crate::storage::{LocationHandle, LocationKind, StorageLocation};
    use bytes::Bytes;
    use std::path::Path;
    use tradewind_ports::{GcmCrypto, MemoryStore, ObjectStore};

    struct Fixture {
        codec: Arc<BackupCodec>,
        manager: Arc<StorageManager>,
        stores: Vec<Arc<MemoryStore>>,
        key: AeadKey,
        _src: tempfile::TempDir,
        sandbox: tempfile::TempDir,
        record: BackupRecord,
    }

    async fn fixture() -> Fixture {
        let src = tempfile::tempdir().unwrap();
        let sandbox = tempfile::tempdir().unwrap();
        let key = AeadKey::new([9u8; 32]);

        let mut files = Vec::new();
        for (rel, contents) in [("config/app.toml", "mode = \"live\""), ("data/x.bin", "1234")] {
            let absolute = src.path().join(rel);
            tokio::fs::create_dir_all(absolute.parent().unwrap())
                .await
                .unwrap();
            tokio::fs::write(&absolute, contents).await.unwrap();
            files.push(SourceFile {
                relative: PathBuf::from(rel),
                absolute,
            });
        }

        let codec = Arc::new(BackupCodec::new(Arc::new(GcmCrypto), 6).unwrap());
        let encoded = codec.encode(&files, &key).await.unwrap();

        let stores: Vec<Arc<MemoryStore>> =
            (0..2).map(|_| Arc::new(MemoryStore::new())).collect();
        let handles = stores
            .iter()
            .enumerate()
            .map(|(i, store)| LocationHandle {
                location: StorageLocation {
                    id: format!("loc-{i}"),
                    kind: LocationKind::Local,
                    priority: i as u8,
                    enabled: true,
                },
                store: store.clone() as Arc<dyn ObjectStore>,
            })
            .collect();
        let manager =
            Arc::new(StorageManager::new(handles, 1, 2, Arc::new(GcmCrypto)).unwrap());

        let mut record = encoded.record.clone();
        manager
            .store(&mut record, &encoded.blob, &CancellationToken::new())
            .await
            .unwrap();

        Fixture {
            codec,
            manager,
            stores,
            key,
            _src: src,
            sandbox,
            record,
        }
    }

    fn tester(fx: &Fixture, preserve_on_failure: bool) -> IntegrityTester {
        IntegrityTester::new(
            fx.codec.clone(),
            fx.manager.clone(),
            EventBus::new(64),
            IntegrityConfig {
                test_count: 5,
                test_all_locations: true,
                sandbox_root: fx.sandbox.path().to_path_buf(),
                content_compare_max_bytes: 1024 * 1024,
                preserve_on_failure,
                history_limit: 4,
            },
        )
    }

    async fn dir_is_empty(path: &Path) -> bool {
        match tokio::fs::read_dir(path).await {
            Ok(mut entries) => entries.next_entry().await.unwrap().is_none(),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn clean_backup_passes_everywhere() {
        let fx = fixture().await;
        let tester = tester(&fx, false);

        let report = tester
            .run(&fx.key, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.cases.len(), 2);
        assert_eq!(report.passed, 2);
        assert_eq!(report.failed, 0);
        for case in &report.cases {
            assert_eq!(case.files_checked, 2);
            assert_eq!(case.files_byte_compared, 2);
        }

        // Sandboxes cleaned up.
        assert!(dir_is_empty(fx.sandbox.path()).await);

        // History retained.
        assert_eq!(tester.history().await.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_copy_fails_only_that_location() {
        let fx = fixture().await;
        let tester = tester(&fx, false);

        let mut poisoned = fx.stores[0]
            .get(&format!("{}.blob", fx.record.id))
            .await
            .unwrap()
            .to_vec();
        poisoned[0] ^= 0x01;
        fx.stores[0].poison(&format!("{}.blob", fx.record.id), Bytes::from(poisoned));

        let report = tester
            .run(&fx.key, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);

        let failed = report.cases.iter().find(|c| !c.passed).unwrap();
        assert_eq!(failed.location_id, "loc-0");
        assert!(matches!(failed.failure, Some(CaseFailure::ChecksumMismatch)));
        // Checksum failed before decode: no files were even checked.
        assert_eq!(failed.files_checked, 0);
    }

    #[tokio::test]
    async fn preserve_on_failure_keeps_sandbox() {
        let fx = fixture().await;
        let tester = tester(&fx, true);

        let key = format!("{}.blob", fx.record.id);
        let mut poisoned = fx.stores[0].get(&key).await.unwrap().to_vec();
        poisoned[0] ^= 0x01;
        fx.stores[0].poison(&key, Bytes::from(poisoned));
        fx.stores[1].poison(&key, {
            let mut p = fx.stores[1].get(&key).await.unwrap().to_vec();
            p[0] ^= 0x01;
            Bytes::from(p)
        });

        let report = tester
            .run(&fx.key, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.failed, 2);
        // Checksum mismatches never created sandboxes, so nothing remains
        // even with preserve-on-failure set.
        assert!(dir_is_empty(fx.sandbox.path()).await);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let fx = fixture().await;
        let tester = tester(&fx, false);
        for _ in 0..6 {
            tester
                .run(&fx.key, &CancellationToken::new())
                .await
                .unwrap();
        }
        assert_eq!(tester.history().await.len(), 4);
    }
}
