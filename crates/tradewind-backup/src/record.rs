//! Backup record metadata.

use std::path::PathBuf;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};

/// One source file covered by a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileRef {
    /// Canonical relative path used as the archive key.
    pub relative: PathBuf,
    /// Absolute path the bytes were read from.
    pub original: PathBuf,
    /// Size of the original file at backup time.
    pub size: u64,
}

/// Immutable metadata for one encoded backup blob.
///
/// The blob hash is the anchor of every integrity check: a copy at any
/// location whose bytes do not hash to `blob_hash` is corrupt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Backup id (timestamp plus random suffix).
    pub id: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Size of the final encrypted blob in bytes.
    pub encrypted_size: u64,
    /// Files the backup covers.
    pub source_files: Vec<SourceFileRef>,
    /// Whether the blob is encrypted (always true for this codec).
    pub encrypted: bool,
    /// compressed / original size. 1.0 for incompressible input.
    pub compression_ratio: f64,
    /// Lowercase hex SHA-256 of the final blob.
    pub blob_hash: String,
    /// Set when replication finished below the configured minimum copies.
    #[serde(default)]
    pub replication_warning: bool,
}

impl BackupRecord {
    /// Generates a fresh backup id.
    pub fn fresh_id(now: DateTime<Utc>) -> String {
        let mut suffix = [0u8; 3];
        rand::rngs::OsRng.fill_bytes(&mut suffix);
        format!(
            "bk-{}-{:02x}{:02x}{:02x}",
            now.format("%Y%m%d%H%M%S"),
            suffix[0],
            suffix[1],
            suffix[2]
        )
    }

    /// Structural validation applied before a record is trusted: non-empty
    /// source list, well-formed hash, plausible timestamp.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(BackupError::MetadataInvalid("empty backup id".to_string()));
        }
        if self.source_files.is_empty() {
            return Err(BackupError::MetadataInvalid(format!(
                "backup {} lists no source files",
                self.id
            )));
        }
        if self.blob_hash.len() != 64 || !self.blob_hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BackupError::MetadataInvalid(format!(
                "backup {} has a malformed blob hash",
                self.id
            )));
        }
        let earliest = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let latest = Utc::now() + Duration::days(1);
        if self.created_at < earliest || self.created_at > latest {
            return Err(BackupError::MetadataInvalid(format!(
                "backup {} has an implausible timestamp {}",
                self.id, self.created_at
            )));
        }
        Ok(())
    }
}

/// Lowercase hex encoding of a digest.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_record() -> BackupRecord {
        BackupRecord {
            id: BackupRecord::fresh_id(Utc::now()),
            created_at: Utc::now(),
            encrypted_size: 1024,
            source_files: vec![SourceFileRef {
                relative: PathBuf::from("config/risk.toml"),
                original: PathBuf::from("/etc/tradewind/risk.toml"),
                size: 512,
            }],
            encrypted: true,
            compression_ratio: 0.4,
            blob_hash: "ab".repeat(32),
            replication_warning: false,
        }
    }

    #[test]
    fn valid_record_passes() {
        valid_record().validate().unwrap();
    }

    #[test]
    fn empty_source_list_rejected() {
        let mut record = valid_record();
        record.source_files.clear();
        assert!(record.validate().is_err());
    }

    #[test]
    fn malformed_hash_rejected() {
        let mut record = valid_record();
        record.blob_hash = "not-a-hash".to_string();
        assert!(record.validate().is_err());

        let mut record = valid_record();
        record.blob_hash = "zz".repeat(32);
        assert!(record.validate().is_err());
    }

    #[test]
    fn implausible_timestamp_rejected() {
        let mut record = valid_record();
        record.created_at = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert!(record.validate().is_err());

        let mut record = valid_record();
        record.created_at = Utc::now() + Duration::days(30);
        assert!(record.validate().is_err());
    }

    #[test]
    fn hex_encoding() {
        assert_eq!(to_hex(&[0x00, 0xff, 0x1a]), "00ff1a");
    }
}
