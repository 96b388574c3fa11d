//! Storage manager: replication fan-out, retrieval, listing and cleanup.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tradewind_core::{retry_with, Kinded, RetryPolicy};
use tradewind_ports::{CryptoProvider, ObjectStore, PortError};

use crate::error::{BackupError, Result};
use crate::record::{to_hex, BackupRecord};

/// What backs a storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocationKind {
    /// Directory on a locally mounted filesystem.
    Local,
    /// Remote object store behind the ObjectStore port.
    ObjectStore,
}

/// One configured storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageLocation {
    /// Stable location id.
    pub id: String,
    /// Backing kind.
    pub kind: LocationKind,
    /// Replication preference; lower fires first.
    pub priority: u8,
    /// Disabled locations are skipped by replication and retrieval.
    pub enabled: bool,
}

/// A location paired with its live adapter.
pub struct LocationHandle {
    /// Location description.
    pub location: StorageLocation,
    /// Adapter the blobs travel through.
    pub store: Arc<dyn ObjectStore>,
}

/// Per-location failure captured during fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationFailure {
    /// Location that failed.
    pub location_id: String,
    /// Failure description.
    pub error: String,
}

/// Result of replicating one backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationOutcome {
    /// Backup id.
    pub backup_id: String,
    /// Locations holding a verified copy.
    pub copies: Vec<String>,
    /// Locations that failed.
    pub failures: Vec<LocationFailure>,
    /// Whether copies ended below the configured minimum.
    pub insufficient: bool,
    /// Configured minimum copies.
    pub min_copies: usize,
}

/// Records visible at one location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationListing {
    /// Location id.
    pub location_id: String,
    /// Parsed side-car records.
    pub records: Vec<BackupRecord>,
    /// Enumeration error, when the location could not be listed.
    pub error: Option<String>,
}

/// Cleanup results for one location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationCleanup {
    /// Location id.
    pub location_id: String,
    /// Backup ids whose blob and side-car were removed.
    pub deleted: Vec<String>,
    /// Side-car keys that failed to parse and were skipped.
    pub skipped_corrupt: Vec<String>,
    /// Enumeration error, when the location could not be cleaned.
    pub error: Option<String>,
}

/// Aggregate cleanup report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Per-location results.
    pub locations: Vec<LocationCleanup>,
}

/// Point-in-time replication statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStatistics {
    /// Configured locations.
    pub total_locations: usize,
    /// Locations currently enabled.
    pub enabled_locations: usize,
    /// Distinct backup ids visible anywhere.
    pub unique_backups: usize,
    /// Records visible per location, in priority order.
    pub records_per_location: Vec<(String, usize)>,
    /// Backups whose visible copies are below the configured minimum.
    pub under_replicated: usize,
}

impl CleanupReport {
    /// Total records removed across locations.
    pub fn total_deleted(&self) -> usize {
        self.locations.iter().map(|l| l.deleted.len()).sum()
    }
}

fn blob_key(backup_id: &str) -> String {
    format!("{backup_id}.blob")
}

fn meta_key(backup_id: &str) -> String {
    format!("{backup_id}.meta")
}

/// Drives replication across prioritized locations and enforces the
/// min/max copy invariants.
///
/// Operations touching the same backup id are serialized through a
/// per-id lock; distinct ids proceed concurrently.
pub struct StorageManager {
    handles: Vec<LocationHandle>,
    min_copies: usize,
    max_copies: usize,
    crypto: Arc<dyn CryptoProvider>,
    write_retry: RetryPolicy,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StorageManager {
    /// Creates a manager over `handles`. `min_copies` must be at least 1
    /// and no greater than `max_copies`.
    pub fn new(
        mut handles: Vec<LocationHandle>,
        min_copies: usize,
        max_copies: usize,
        crypto: Arc<dyn CryptoProvider>,
    ) -> Result<Self> {
        if min_copies == 0 {
            return Err(BackupError::InvalidArgument(
                "minCopies must be at least 1".to_string(),
            ));
        }
        if min_copies > max_copies {
            return Err(BackupError::InvalidArgument(format!(
                "minCopies {min_copies} exceeds maxCopies {max_copies}"
            )));
        }
        if handles.is_empty() {
            return Err(BackupError::InvalidArgument(
                "at least one storage location is required".to_string(),
            ));
        }
        handles.sort_by_key(|h| h.location.priority);
        Ok(Self {
            handles,
            min_copies,
            max_copies,
            crypto,
            write_retry: RetryPolicy::fixed(3, Duration::from_secs(2)),
            locks: DashMap::new(),
        })
    }

    fn lock_for(&self, backup_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(backup_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Configured locations in priority order.
    pub fn locations(&self) -> Vec<StorageLocation> {
        self.handles.iter().map(|h| h.location.clone()).collect()
    }

    /// Replicates `blob` to enabled locations in priority order, stopping
    /// at `max_copies`. Below `min_copies` the outcome is flagged
    /// insufficient and the record carries a replication warning, but the
    /// call still succeeds with whatever copies it achieved.
    pub async fn store(
        &self,
        record: &mut BackupRecord,
        blob: &Bytes,
        cancel: &CancellationToken,
    ) -> Result<ReplicationOutcome> {
        record.validate()?;
        let expected = to_hex(&self.crypto.sha256(blob));
        if !expected.eq_ignore_ascii_case(&record.blob_hash) {
            return Err(BackupError::ChecksumMismatch {
                backup_id: record.id.clone(),
                expected: record.blob_hash.clone(),
                actual: expected,
            });
        }

        let id_lock = self.lock_for(&record.id);
        let _guard = id_lock.lock().await;

        let mut copies = Vec::new();
        let mut failures = Vec::new();

        for handle in &self.handles {
            if copies.len() >= self.max_copies {
                break;
            }
            if !handle.location.enabled {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            let key = blob_key(&record.id);
            let result = retry_with(
                &self.write_retry,
                cancel,
                |e: &PortError| e.is_recoverable(),
                |_| handle.store.put(&key, blob.clone()),
            )
            .await;

            match result {
                Ok(()) => copies.push(handle.location.id.clone()),
                Err(retry_err) => {
                    let message = retry_err
                        .into_inner()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "cancelled".to_string());
                    warn!(
                        backup_id = %record.id,
                        location = %handle.location.id,
                        error = %message,
                        "replication to location failed"
                    );
                    failures.push(LocationFailure {
                        location_id: handle.location.id.clone(),
                        error: message,
                    });
                }
            }
        }

        let insufficient = copies.len() < self.min_copies;
        record.replication_warning = insufficient;

        // Side-cars go out after fan-out so every copy carries the final
        // record, warning flag included.
        let meta =
            Bytes::from(serde_json::to_vec_pretty(&record).map_err(BackupError::Serialization)?);
        for location_id in &copies {
            if let Some(handle) = self
                .handles
                .iter()
                .find(|h| &h.location.id == location_id)
            {
                if let Err(e) = handle.store.put(&meta_key(&record.id), meta.clone()).await {
                    warn!(
                        backup_id = %record.id,
                        location = %location_id,
                        error = %e,
                        "side-car write failed"
                    );
                }
            }
        }

        if insufficient {
            warn!(
                backup_id = %record.id,
                copies = copies.len(),
                min_copies = self.min_copies,
                "replication finished below minimum copies"
            );
        } else {
            info!(
                backup_id = %record.id,
                copies = copies.len(),
                "backup replicated"
            );
        }

        Ok(ReplicationOutcome {
            backup_id: record.id.clone(),
            copies,
            failures,
            insufficient,
            min_copies: self.min_copies,
        })
    }

    /// Fetches the blob from the highest-priority location holding an
    /// uncorrupted copy. A fetch only counts when the bytes hash to the
    /// recorded value.
    pub async fn retrieve(&self, record: &BackupRecord) -> Result<Bytes> {
        let mut saw_mismatch = false;
        for handle in &self.handles {
            if !handle.location.enabled {
                continue;
            }
            match self.fetch_verified(handle, record).await {
                Ok(blob) => return Ok(blob),
                Err(BackupError::ChecksumMismatch { .. }) => {
                    warn!(
                        backup_id = %record.id,
                        location = %handle.location.id,
                        "corrupt copy skipped during retrieval"
                    );
                    saw_mismatch = true;
                }
                Err(e) => {
                    warn!(
                        backup_id = %record.id,
                        location = %handle.location.id,
                        error = %e,
                        "retrieval from location failed"
                    );
                }
            }
        }
        if saw_mismatch {
            Err(BackupError::ChecksumMismatch {
                backup_id: record.id.clone(),
                expected: record.blob_hash.clone(),
                actual: "no location held a verified copy".to_string(),
            })
        } else {
            Err(BackupError::NotFound(record.id.clone()))
        }
    }

    /// Fetches and verifies the blob from one specific location.
    pub async fn retrieve_from(
        &self,
        location_id: &str,
        record: &BackupRecord,
    ) -> Result<Bytes> {
        let handle = self
            .handles
            .iter()
            .find(|h| h.location.id == location_id)
            .ok_or_else(|| BackupError::LocationUnavailable(location_id.to_string()))?;
        self.fetch_verified(handle, record).await
    }

    async fn fetch_verified(
        &self,
        handle: &LocationHandle,
        record: &BackupRecord,
    ) -> Result<Bytes> {
        let blob = handle
            .store
            .get(&blob_key(&record.id))
            .await
            .map_err(BackupError::Port)?;
        let actual = to_hex(&self.crypto.sha256(&blob));
        if !actual.eq_ignore_ascii_case(&record.blob_hash) {
            return Err(BackupError::ChecksumMismatch {
                backup_id: record.id.clone(),
                expected: record.blob_hash.clone(),
                actual,
            });
        }
        Ok(blob)
    }

    /// Lists the records visible at every configured location. A location
    /// that cannot be enumerated contributes an error entry instead of
    /// failing the call.
    pub async fn list(&self) -> Vec<LocationListing> {
        let mut listings = Vec::with_capacity(self.handles.len());
        for handle in &self.handles {
            let mut listing = LocationListing {
                location_id: handle.location.id.clone(),
                records: Vec::new(),
                error: None,
            };
            match handle.store.list("").await {
                Ok(keys) => {
                    for key in keys.iter().filter(|k| k.ends_with(".meta")) {
                        match handle.store.get(key).await {
                            Ok(bytes) => match serde_json::from_slice::<BackupRecord>(&bytes) {
                                Ok(record) => listing.records.push(record),
                                Err(e) => warn!(
                                    location = %handle.location.id,
                                    key = %key,
                                    error = %e,
                                    "unparseable side-car skipped in listing"
                                ),
                            },
                            Err(e) => warn!(
                                location = %handle.location.id,
                                key = %key,
                                error = %e,
                                "side-car fetch failed in listing"
                            ),
                        }
                    }
                    listing
                        .records
                        .sort_by(|a, b| b.created_at.cmp(&a.created_at));
                }
                Err(e) => listing.error = Some(e.to_string()),
            }
            listings.push(listing);
        }
        listings
    }

    /// Computes replication statistics from the current listings.
    pub async fn statistics(&self) -> StorageStatistics {
        let listings = self.list().await;
        let mut copies_per_backup: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();
        let mut records_per_location = Vec::with_capacity(listings.len());
        for listing in &listings {
            records_per_location.push((listing.location_id.clone(), listing.records.len()));
            for record in &listing.records {
                *copies_per_backup.entry(record.id.clone()).or_insert(0) += 1;
            }
        }
        StorageStatistics {
            total_locations: self.handles.len(),
            enabled_locations: self
                .handles
                .iter()
                .filter(|h| h.location.enabled)
                .count(),
            unique_backups: copies_per_backup.len(),
            under_replicated: copies_per_backup
                .values()
                .filter(|&&copies| copies < self.min_copies)
                .count(),
            records_per_location,
        }
    }

    /// Deletes records older than `retention` at every location. Corrupt
    /// side-cars are reported and skipped; the operation is idempotent and
    /// serialized per backup id against concurrent stores.
    pub async fn cleanup(
        &self,
        retention: chrono::Duration,
        cancel: &CancellationToken,
    ) -> Result<CleanupReport> {
        let cutoff = Utc::now() - retention;
        let mut report = CleanupReport::default();

        for handle in &self.handles {
            let mut cleanup = LocationCleanup {
                location_id: handle.location.id.clone(),
                ..Default::default()
            };

            let keys = match handle.store.list("").await {
                Ok(keys) => keys,
                Err(e) => {
                    cleanup.error = Some(e.to_string());
                    report.locations.push(cleanup);
                    continue;
                }
            };

            for key in keys.iter().filter(|k| k.ends_with(".meta")) {
                if cancel.is_cancelled() {
                    return Err(BackupError::Cancelled);
                }
                let record: BackupRecord = match handle.store.get(key).await {
                    Ok(bytes) => match serde_json::from_slice(&bytes) {
                        Ok(record) => record,
                        Err(_) => {
                            cleanup.skipped_corrupt.push(key.clone());
                            continue;
                        }
                    },
                    Err(e) => {
                        warn!(key = %key, error = %e, "side-car fetch failed during cleanup");
                        continue;
                    }
                };

                if record.created_at >= cutoff {
                    continue;
                }

                let id_lock = self.lock_for(&record.id);
                let _guard = id_lock.lock().await;
                for doomed in [blob_key(&record.id), meta_key(&record.id)] {
                    match handle.store.delete(&doomed).await {
                        Ok(()) => {}
                        Err(PortError::ObjectNotFound(_)) => {}
                        Err(e) => {
                            warn!(key = %doomed, error = %e, "delete failed during cleanup");
                        }
                    }
                }
                cleanup.deleted.push(record.id.clone());
            }

            report.locations.push(cleanup);
        }

        info!(deleted = report.total_deleted(), "cleanup pass complete");
        Ok(report)
    }
}
