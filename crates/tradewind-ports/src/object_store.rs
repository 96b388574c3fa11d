//! Object-store port with local-filesystem and in-memory adapters.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PortError, PortResult};

/// Metadata for one stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStat {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

/// Port to a blob store.
///
/// Keys are `/`-separated relative paths. Credentials and transport are the
/// adapter's concern; the core only sees bytes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `key`, overwriting any previous object.
    async fn put(&self, key: &str, bytes: Bytes) -> PortResult<()>;

    /// Fetches the object stored under `key`.
    async fn get(&self, key: &str) -> PortResult<Bytes>;

    /// Deletes the object stored under `key`. Deleting a missing key is an
    /// error (`ObjectNotFound`).
    async fn delete(&self, key: &str) -> PortResult<()>;

    /// Lists all keys starting with `prefix`.
    async fn list(&self, prefix: &str) -> PortResult<Vec<String>>;

    /// Returns size and modification time for `key`.
    async fn stat(&self, key: &str) -> PortResult<ObjectStat>;
}

/// Rejects keys that would escape the store root.
fn validate_key(key: &str) -> PortResult<()> {
    if key.is_empty() {
        return Err(PortError::Store("empty object key".to_string()));
    }
    let path = Path::new(key);
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(PortError::Store(format!("unsafe object key: {key}")));
    }
    Ok(())
}

/// Object store backed by a directory on the local filesystem.
pub struct LocalFsStore {
    root: PathBuf,
}

impl LocalFsStore {
    /// Creates a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory this store writes under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PortResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalFsStore {
    async fn put(&self, key: &str, bytes: Bytes) -> PortResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Temp-write then rename so readers never observe a partial blob.
        // The suffix is appended, not substituted, so `x.blob` and
        // `x.meta` never share a temp file.
        let tmp = PathBuf::from(format!("{}.tmp-write", path.display()));
        tokio::fs::write(&tmp, &bytes).await?;
        let file = tokio::fs::File::open(&tmp).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(key, size = bytes.len(), "stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> PortResult<Bytes> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PortError::ObjectNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> PortResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PortError::ObjectNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> PortResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().is_some_and(|e| e == "tmp-write") {
                    continue;
                }
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn stat(&self, key: &str) -> PortResult<ObjectStat> {
        let path = self.path_for(key)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PortError::ObjectNotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let last_modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(ObjectStat {
            size: meta.len(),
            last_modified,
        })
    }
}

/// In-memory object store used by tests and the DR harness sandbox.
#[derive(Default)]
pub struct MemoryStore {
    objects: DashMap<String, (Bytes, DateTime<Utc>)>,
    unavailable: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the store unreachable; subsequent operations fail with a
    /// store error until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    /// Overwrites an object in place without updating its timestamp. Test
    /// hook for corruption scenarios.
    pub fn poison(&self, key: &str, bytes: Bytes) {
        if let Some(mut entry) = self.objects.get_mut(key) {
            entry.value_mut().0 = bytes;
        }
    }

    fn check_available(&self) -> PortResult<()> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(PortError::Store("store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, bytes: Bytes) -> PortResult<()> {
        self.check_available()?;
        validate_key(key)?;
        self.objects.insert(key.to_string(), (bytes, Utc::now()));
        Ok(())
    }

    async fn get(&self, key: &str) -> PortResult<Bytes> {
        self.check_available()?;
        self.objects
            .get(key)
            .map(|entry| entry.value().0.clone())
            .ok_or_else(|| PortError::ObjectNotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> PortResult<()> {
        self.check_available()?;
        self.objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| PortError::ObjectNotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> PortResult<Vec<String>> {
        self.check_available()?;
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn stat(&self, key: &str) -> PortResult<ObjectStat> {
        self.check_available()?;
        self.objects
            .get(key)
            .map(|entry| ObjectStat {
                size: entry.value().0.len() as u64,
                last_modified: entry.value().1,
            })
            .ok_or_else(|| PortError::ObjectNotFound(key.to_string()))
    }
}
