//! Backup codec: archive, compress, encrypt, hash.
//!
//! Encode pipeline: read every source file, serialize them into a stable
//! archive keyed by canonical relative path (lexicographic order, `/`
//! separators), gzip the archive at the configured level, seal it with
//! AES-256-GCM under a fresh nonce and the product associated-data tag,
//! and hash the final blob with SHA-256. Decode inverts the pipeline and
//! refuses to touch the filesystem until both the hash and the auth tag
//! have verified.

use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tradewind_ports::{crypto::random_nonce, AeadKey, CryptoProvider, NONCE_LEN};

use crate::error::{BackupError, Result};
use crate::record::{to_hex, BackupRecord, SourceFileRef};
use crate::sources::SourceFile;

/// Associated-data tag binding every blob to this product and format
/// version. Changing the format bumps the suffix and old blobs keep
/// verifying under their own tag.
pub const PRODUCT_AAD: &[u8] = b"tradewind-backup/1";

/// One file inside the archive.
#[derive(Debug, Serialize, Deserialize)]
struct ArchiveEntry {
    /// Canonical relative path, `/`-separated.
    path: String,
    contents: Vec<u8>,
}

/// Result of encoding a backup.
#[derive(Debug)]
pub struct EncodedBackup {
    /// The sealed blob: nonce ‖ ciphertext+tag.
    pub blob: Bytes,
    /// Metadata record, hash already computed.
    pub record: BackupRecord,
}

/// The encode/decode pipeline.
///
/// The codec holds no key material; keys arrive per call and are never
/// persisted by it.
pub struct BackupCodec {
    crypto: Arc<dyn CryptoProvider>,
    compression_level: u32,
}

impl BackupCodec {
    /// Creates a codec compressing at `level` (0–9).
    pub fn new(crypto: Arc<dyn CryptoProvider>, compression_level: u32) -> Result<Self> {
        if compression_level > 9 {
            return Err(BackupError::InvalidArgument(format!(
                "compression level must be 0-9, got {compression_level}"
            )));
        }
        Ok(Self {
            crypto,
            compression_level,
        })
    }

    /// Encodes `files` into a sealed blob and its record.
    ///
    /// Rejects an empty file set and duplicate archive keys.
    pub async fn encode(&self, files: &[SourceFile], key: &AeadKey) -> Result<EncodedBackup> {
        if files.is_empty() {
            return Err(BackupError::InvalidArgument(
                "a backup must cover at least one file".to_string(),
            ));
        }

        let mut sorted: Vec<&SourceFile> = files.iter().collect();
        sorted.sort_by(|a, b| a.relative.cmp(&b.relative));

        let mut entries = Vec::with_capacity(sorted.len());
        let mut refs = Vec::with_capacity(sorted.len());
        let mut original_size = 0u64;
        for file in sorted {
            let archive_path = canonical_archive_path(&file.relative)?;
            if entries
                .last()
                .is_some_and(|e: &ArchiveEntry| e.path == archive_path)
            {
                return Err(BackupError::InvalidArgument(format!(
                    "duplicate archive path: {archive_path}"
                )));
            }
            let contents = tokio::fs::read(&file.absolute).await?;
            original_size += contents.len() as u64;
            refs.push(SourceFileRef {
                relative: file.relative.clone(),
                original: file.absolute.clone(),
                size: contents.len() as u64,
            });
            entries.push(ArchiveEntry {
                path: archive_path,
                contents,
            });
        }

        let archive = bincode::serialize(&entries)
            .map_err(|e| BackupError::MetadataInvalid(format!("archive framing: {e}")))?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.compression_level));
        encoder.write_all(&archive)?;
        let compressed = encoder.finish()?;

        let nonce = random_nonce();
        let sealed = self
            .crypto
            .aead_encrypt(key, &nonce, PRODUCT_AAD, &compressed)
            .map_err(BackupError::Port)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);

        let blob_hash = to_hex(&self.crypto.sha256(&blob));
        let record = BackupRecord {
            id: BackupRecord::fresh_id(Utc::now()),
            created_at: Utc::now(),
            encrypted_size: blob.len() as u64,
            source_files: refs,
            encrypted: true,
            compression_ratio: if original_size == 0 {
                1.0
            } else {
                compressed.len() as f64 / original_size as f64
            },
            blob_hash,
            replication_warning: false,
        };

        info!(
            backup_id = %record.id,
            files = record.source_files.len(),
            original_size,
            encrypted_size = record.encrypted_size,
            ratio = record.compression_ratio,
            "backup encoded"
        );

        Ok(EncodedBackup {
            blob: Bytes::from(blob),
            record,
        })
    }

    /// Decodes `blob` under `target_root`, returning the restored relative
    /// paths.
    ///
    /// Verification order is fixed: blob hash, then auth tag, then
    /// decompression, then archive framing. Nothing is written until all
    /// four passed.
    pub async fn decode(
        &self,
        blob: &[u8],
        expected_hash: &str,
        key: &AeadKey,
        target_root: &Path,
    ) -> Result<Vec<PathBuf>> {
        let actual_hash = to_hex(&self.crypto.sha256(blob));
        if !actual_hash.eq_ignore_ascii_case(expected_hash) {
            return Err(BackupError::ChecksumMismatch {
                backup_id: String::new(),
                expected: expected_hash.to_string(),
                actual: actual_hash,
            });
        }

        if blob.len() < NONCE_LEN + 16 {
            return Err(BackupError::DecryptFailed);
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&blob[..NONCE_LEN]);

        let compressed = self
            .crypto
            .aead_decrypt(key, &nonce, PRODUCT_AAD, &blob[NONCE_LEN..])
            .map_err(|_| BackupError::DecryptFailed)?;

        let mut archive = Vec::new();
        GzDecoder::new(&compressed[..])
            .read_to_end(&mut archive)
            .map_err(|e| BackupError::DecompressFailed(e.to_string()))?;

        let entries: Vec<ArchiveEntry> = bincode::deserialize(&archive)
            .map_err(|e| BackupError::DecompressFailed(format!("archive framing: {e}")))?;

        let mut restored = Vec::with_capacity(entries.len());
        for entry in entries {
            let relative = safe_relative_path(&entry.path)?;
            let destination = target_root.join(&relative);
            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&destination, &entry.contents).await?;
            debug!(path = %relative.display(), "restored file");
            restored.push(relative);
        }
        Ok(restored)
    }
}

/// Canonicalizes a relative path into the archive key form.
fn canonical_archive_path(relative: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(BackupError::InvalidArgument(format!(
                    "source path must be relative: {}",
                    relative.display()
                )))
            }
        }
    }
    if parts.is_empty() {
        return Err(BackupError::InvalidArgument("empty source path".to_string()));
    }
    Ok(parts.join("/"))
}

/// Validates an archive key from an untrusted blob before writing.
fn safe_relative_path(archive_path: &str) -> Result<PathBuf> {
    let path = Path::new(archive_path);
    if path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(BackupError::DecompressFailed(format!(
            "unsafe archive path: {archive_path}"
        )));
    }
    Ok(path.to_path_buf())
}
