//! Closed configuration schema with load-time validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tradewind_backup::{Cadence, LocationKind};
use tradewind_drtest::{ReportFormat, Scenario};
use tradewind_ports::AeadKey;
use tradewind_versions::RetentionPolicy;

use crate::error::{ControlError, Result};

/// Version store options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VersionStoreOptions {
    /// Directory version records persist under.
    pub root: PathBuf,
    /// Directory deployment snapshots are captured under.
    pub snapshot_root: PathBuf,
    /// Retention ceiling for non-archived versions. At least 1.
    pub max_versions: usize,
    /// What happens past the ceiling.
    #[serde(default = "default_retention_policy")]
    pub retention_policy: RetentionPolicy,
}

fn default_retention_policy() -> RetentionPolicy {
    RetentionPolicy::ArchiveThenDelete
}

/// Rollback executor options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RollbackOptions {
    /// Hard wall-clock budget for a rollback run.
    #[serde(default = "default_overall_deadline_secs")]
    pub overall_deadline_secs: u64,
    /// Graceful stop budget before a force stop.
    #[serde(default = "default_graceful_shutdown_secs")]
    pub graceful_shutdown_secs: u64,
    /// Fallback per-step timeout.
    #[serde(default = "default_per_step_timeout_secs")]
    pub per_step_timeout_secs: u64,
    /// Schedule instructions into parallel groups.
    #[serde(default = "default_true")]
    pub parallel_groups_enabled: bool,
    /// Run the deployment validator after a successful rollback.
    #[serde(default = "default_true")]
    pub auto_validate: bool,
    /// Root under which services are installed.
    pub install_root: PathBuf,
    /// Canonical configuration root.
    pub config_root: PathBuf,
}

fn default_overall_deadline_secs() -> u64 {
    120
}
fn default_graceful_shutdown_secs() -> u64 {
    10
}
fn default_per_step_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

/// Backup pipeline options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupOptions {
    /// Roots the daily backup walks.
    pub source_roots: Vec<PathBuf>,
    /// Include globs (empty selects everything).
    #[serde(default)]
    pub include_globs: Vec<String>,
    /// Exclude globs.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Per-location retention in days.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Daily fire time, `HH:MM` UTC.
    pub daily_fire_time: String,
    /// Gzip level 0-9.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    /// 64-hex-character AES-256 key.
    pub aead_key: String,
}

fn default_retention_days() -> u32 {
    30
}
fn default_compression_level() -> u32 {
    6
}

/// One storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LocationConfig {
    /// Stable location id.
    pub id: String,
    /// Backing kind.
    pub kind: LocationKind,
    /// Replication preference; lower fires first.
    pub priority: u8,
    /// Disabled locations are skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Adapter root (directory for local, endpoint-specific for remote).
    pub root: PathBuf,
}

/// Replication options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageOptions {
    /// Configured locations.
    pub locations: Vec<LocationConfig>,
    /// Minimum successful copies. At least 1.
    pub min_copies: usize,
    /// Replication stops at this many copies.
    pub max_copies: usize,
}

/// Integrity tester options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IntegrityOptions {
    /// Weekly fire day (`mon`..`sun`).
    pub weekly_fire_day: String,
    /// Weekly fire time, `HH:MM` UTC.
    pub weekly_fire_time: String,
    /// How many recent backups each run covers.
    #[serde(default = "default_test_count")]
    pub test_count: usize,
    /// Test every location holding a copy.
    #[serde(default = "default_true")]
    pub test_all_locations: bool,
    /// Sandbox directory for restores.
    pub sandbox_root: PathBuf,
    /// Byte-compare ceiling.
    #[serde(default = "default_content_compare_max_bytes")]
    pub content_compare_max_bytes: u64,
}

fn default_test_count() -> usize {
    3
}
fn default_content_compare_max_bytes() -> u64 {
    16 * 1024 * 1024
}

/// DR test options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DrTestOptions {
    /// Monthly fire day, 1-28.
    pub monthly_fire_day: u32,
    /// Monthly fire time, `HH:MM` UTC.
    pub monthly_fire_time: String,
    /// Declared scenarios.
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    /// Report formats to emit.
    #[serde(default = "default_report_formats")]
    pub report_formats: Vec<ReportFormat>,
    /// Directory reports are written into.
    pub report_dir: PathBuf,
    /// Keep failure sandboxes for post-mortem.
    #[serde(default)]
    pub preserve_on_failure: bool,
    /// Simulate failure injection instead of driving the supervisor.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_report_formats() -> Vec<ReportFormat> {
    vec![ReportFormat::Json]
}

/// The complete, closed control-plane configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControlPlaneConfig {
    /// Version store options.
    pub version_store: VersionStoreOptions,
    /// Rollback executor options.
    pub rollback: RollbackOptions,
    /// Backup pipeline options.
    pub backup: BackupOptions,
    /// Replication options.
    pub storage: StorageOptions,
    /// Integrity tester options.
    pub integrity: IntegrityOptions,
    /// DR test options.
    pub dr_test: DrTestOptions,
}

impl ControlPlaneConfig {
    /// Loads configuration from a TOML file with `TRADEWIND__`-prefixed
    /// environment overrides, then validates it.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("TRADEWIND")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ControlError::Configuration(e.to_string()))?;
        let parsed: ControlPlaneConfig = settings
            .try_deserialize()
            .map_err(|e| ControlError::Configuration(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Validates every recognized option. Unknown schedule shapes, bad
    /// keys and impossible replication bounds are rejected here, before
    /// any component is constructed.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(ControlError::Configuration(message));

        if self.version_store.max_versions == 0 {
            return fail("version-store.max-versions must be at least 1".to_string());
        }
        if self.rollback.overall_deadline_secs == 0 {
            return fail("rollback.overall-deadline-secs must be positive".to_string());
        }

        if self.backup.source_roots.is_empty() {
            return fail("backup.source-roots must not be empty".to_string());
        }
        if self.backup.compression_level > 9 {
            return fail(format!(
                "backup.compression-level must be 0-9, got {}",
                self.backup.compression_level
            ));
        }
        AeadKey::from_hex(&self.backup.aead_key)
            .map_err(|e| ControlError::Configuration(format!("backup.aead-key: {e}")))?;

        if self.storage.min_copies == 0 {
            return fail("storage.min-copies must be at least 1".to_string());
        }
        if self.storage.min_copies > self.storage.max_copies {
            return fail(format!(
                "storage.min-copies {} exceeds storage.max-copies {}",
                self.storage.min_copies, self.storage.max_copies
            ));
        }
        if self.storage.locations.is_empty() {
            return fail("storage.locations must not be empty".to_string());
        }
        let mut seen = HashSet::new();
        for location in &self.storage.locations {
            if !seen.insert(location.id.as_str()) {
                return fail(format!("duplicate storage location id {:?}", location.id));
            }
        }

        // The three cadences must parse; everything broader than the
        // daily/weekly/monthly grammar is rejected up front.
        self.daily_backup_cadence()?;
        self.weekly_integrity_cadence()?;
        self.monthly_dr_cadence()?;

        Ok(())
    }

    /// Cadence of the daily backup track.
    pub fn daily_backup_cadence(&self) -> Result<Cadence> {
        let (hour, minute) = Cadence::parse_time(&self.backup.daily_fire_time)
            .map_err(|e| ControlError::Configuration(format!("backup.daily-fire-time: {e}")))?;
        Cadence::daily(hour, minute)
            .map_err(|e| ControlError::Configuration(format!("backup.daily-fire-time: {e}")))
    }

    /// Cadence of the weekly integrity track.
    pub fn weekly_integrity_cadence(&self) -> Result<Cadence> {
        let weekday = Cadence::parse_weekday(&self.integrity.weekly_fire_day)
            .map_err(|e| ControlError::Configuration(format!("integrity.weekly-fire-day: {e}")))?;
        let (hour, minute) = Cadence::parse_time(&self.integrity.weekly_fire_time)
            .map_err(|e| ControlError::Configuration(format!("integrity.weekly-fire-time: {e}")))?;
        Cadence::weekly(weekday, hour, minute)
            .map_err(|e| ControlError::Configuration(format!("integrity schedule: {e}")))
    }

    /// Cadence of the monthly DR test track.
    pub fn monthly_dr_cadence(&self) -> Result<Cadence> {
        let (hour, minute) = Cadence::parse_time(&self.dr_test.monthly_fire_time)
            .map_err(|e| ControlError::Configuration(format!("dr-test.monthly-fire-time: {e}")))?;
        Cadence::monthly(self.dr_test.monthly_fire_day, hour, minute)
            .map_err(|e| ControlError::Configuration(format!("dr-test schedule: {e}")))
    }

    /// The parsed AEAD key.
    pub fn aead_key(&self) -> Result<AeadKey> {
        AeadKey::from_hex(&self.backup.aead_key)
            .map_err(|e| ControlError::Configuration(e.to_string()))
    }
}
