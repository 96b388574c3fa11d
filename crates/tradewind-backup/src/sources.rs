//! Glob-driven selection of backup source files.

use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::debug;

use crate::error::{BackupError, Result};

/// One file selected for backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Archive-relative path. For multi-root selections the root's
    /// directory name is the first component, so keys stay unique.
    pub relative: PathBuf,
    /// Absolute path to read from.
    pub absolute: PathBuf,
}

/// Walks configured source roots and applies include/exclude globs.
///
/// Globs support `**`, `?` and character classes and are matched against
/// the `/`-separated path relative to each root. An empty include list
/// selects everything.
pub struct SourceSelector {
    roots: Vec<PathBuf>,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl SourceSelector {
    /// Compiles the selector. Malformed globs are rejected here, at
    /// configuration time, not at backup time.
    pub fn new(roots: Vec<PathBuf>, include: &[String], exclude: &[String]) -> Result<Self> {
        if roots.is_empty() {
            return Err(BackupError::InvalidArgument(
                "at least one source root is required".to_string(),
            ));
        }
        let compile = |globs: &[String]| -> Result<Vec<Pattern>> {
            globs
                .iter()
                .map(|g| {
                    Pattern::new(g).map_err(|e| {
                        BackupError::InvalidArgument(format!("invalid glob {g:?}: {e}"))
                    })
                })
                .collect()
        };
        Ok(Self {
            roots,
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Collects every matching file under every root, sorted by relative
    /// path. Missing roots are skipped.
    pub async fn collect(&self) -> Result<Vec<SourceFile>> {
        let mut files = Vec::new();
        for root in &self.roots {
            let root_name = root
                .file_name()
                .map(|n| PathBuf::from(n))
                .unwrap_or_else(|| PathBuf::from("root"));
            let prefix = if self.roots.len() > 1 {
                Some(root_name)
            } else {
                None
            };
            self.walk_root(root, prefix.as_deref(), &mut files).await?;
        }
        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        debug!(files = files.len(), "source selection complete");
        Ok(files)
    }

    async fn walk_root(
        &self,
        root: &Path,
        prefix: Option<&Path>,
        files: &mut Vec<SourceFile>,
    ) -> Result<()> {
        let mut pending = vec![root.to_path_buf()];
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
                let rel = path
                    .strip_prefix(root)
                    .map_err(|_| BackupError::InvalidArgument("path outside root".to_string()))?;
                if !self.matches(rel) {
                    continue;
                }
                let relative = match prefix {
                    Some(p) => p.join(rel),
                    None => rel.to_path_buf(),
                };
                files.push(SourceFile {
                    relative,
                    absolute: path,
                });
            }
        }
        Ok(())
    }

    fn matches(&self, rel: &Path) -> bool {
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let included =
            self.include.is_empty() || self.include.iter().any(|p| p.matches(&key));
        let excluded = self.exclude.iter().any(|p| p.matches(&key));
        included && !excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tree(dir: &Path, files: &[&str]) {
        for rel in files {
            let path = dir.join(rel);
            tokio::fs::create_dir_all(path.parent().unwrap())
                .await
                .unwrap();
            tokio::fs::write(&path, b"x").await.unwrap();
        }
    }

    #[tokio::test]
    async fn include_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        tree(
            dir.path(),
            &[
                "config/risk.toml",
                "config/venues/nyse.toml",
                "logs/today.log",
                "state/positions.bin",
            ],
        )
        .await;

        let selector = SourceSelector::new(
            vec![dir.path().to_path_buf()],
            &["config/**".to_string(), "state/*.bin".to_string()],
            &["**/*.log".to_string()],
        )
        .unwrap();

        let files = selector.collect().await.unwrap();
        let rels: Vec<String> = files
            .iter()
            .map(|f| f.relative.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            rels,
            vec![
                "config/risk.toml",
                "config/venues/nyse.toml",
                "state/positions.bin"
            ]
        );
    }

    #[tokio::test]
    async fn question_mark_and_classes() {
        let dir = tempfile::tempdir().unwrap();
        tree(dir.path(), &["a1.cfg", "a2.cfg", "b1.cfg", "a10.cfg"]).await;

        let selector = SourceSelector::new(
            vec![dir.path().to_path_buf()],
            &["a?.cfg".to_string()],
            &["a[2-9].cfg".to_string()],
        )
        .unwrap();

        let files = selector.collect().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative, PathBuf::from("a1.cfg"));
    }

    #[tokio::test]
    async fn multi_root_prefixes_keys() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        tree(a.path(), &["x.toml"]).await;
        tree(b.path(), &["x.toml"]).await;

        let selector = SourceSelector::new(
            vec![a.path().to_path_buf(), b.path().to_path_buf()],
            &[],
            &[],
        )
        .unwrap();

        let files = selector.collect().await.unwrap();
        assert_eq!(files.len(), 2);
        assert_ne!(files[0].relative, files[1].relative);
    }

    #[test]
    fn malformed_glob_rejected_at_construction() {
        let err = SourceSelector::new(
            vec![PathBuf::from("/tmp")],
            &["[unclosed".to_string()],
            &[],
        );
        assert!(err.is_err());
    }
}
