//! Connector capability and the local filesystem connector.
//!
//! A connector hands the pipeline already-materialized
//! [`DocumentRecord`]s in batches. Protocol-specific connectors (mail,
//! document management systems, chat exports) implement the same trait.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::Mutex;
use walkdir::WalkDir;

use docgate_core::models::{checksum, DocumentRecord};

use crate::config::FilesystemConnectorConfig;
use crate::router::mime_from_extension;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Source label stored on every document (e.g. `"filesystem"`).
    fn name(&self) -> &str;

    /// Up to `max` records not yet returned by this connector instance.
    /// An empty batch means the source is drained.
    async fn fetch_next_batch(&self, max: usize) -> Result<Vec<DocumentRecord>>;
}

/// Walks a directory tree once and serves its files in sorted order.
pub struct FilesystemConnector {
    config: FilesystemConnectorConfig,
    pending: Mutex<Option<VecDeque<(PathBuf, String)>>>,
}

impl FilesystemConnector {
    pub fn new(config: FilesystemConnectorConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(None),
        }
    }

    /// Stable document id for a path relative to the root.
    pub fn document_id(relative_path: &str) -> String {
        checksum(format!("filesystem:{}", relative_path).as_bytes())[..32].to_string()
    }
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn fetch_next_batch(&self, max: usize) -> Result<Vec<DocumentRecord>> {
        let mut pending = self.pending.lock().await;
        if pending.is_none() {
            let files = scan_filesystem(&self.config)?;
            tracing::info!(
                root = %self.config.root.display(),
                files = files.len(),
                "filesystem scan complete"
            );
            *pending = Some(files.into());
        }
        let Some(queue) = pending.as_mut() else {
            return Ok(Vec::new());
        };

        let mut batch = Vec::new();
        while batch.len() < max {
            let Some((path, relative)) = queue.pop_front() else {
                break;
            };
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| relative.clone());

            let mut tags = self.config.tags.clone();
            tags.insert("path".to_string(), relative.clone());

            batch.push(DocumentRecord {
                id: Self::document_id(&relative),
                source: self.name().to_string(),
                declared_mime: mime_from_extension(&filename).to_string(),
                filename,
                bytes,
                tags,
            });
        }
        Ok(batch)
    }
}

/// Matching files as `(absolute path, relative path)`, sorted by relative
/// path.
pub fn scan_filesystem(config: &FilesystemConnectorConfig) -> Result<Vec<(PathBuf, String)>> {
    let root = &config.root;
    if !root.exists() {
        bail!(
            "Filesystem connector root does not exist: {}",
            root.display()
        );
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel_str = relative(root, path);

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push((path.to_path_buf(), rel_str));
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(root: &Path) -> FilesystemConnectorConfig {
        FilesystemConnectorConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*".to_string()],
            exclude_globs: vec!["**/*.tmp".to_string()],
            follow_symlinks: false,
            tags: [("department".to_string(), "maintenance".to_string())]
                .into_iter()
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_batches_in_sorted_order() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("logs")).unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join("b.txt"), "b").unwrap();
        std::fs::write(tmp.path().join("a.pdf"), "%PDF-").unwrap();
        std::fs::write(tmp.path().join("logs/c.md"), "c").unwrap();
        std::fs::write(tmp.path().join("skip.tmp"), "x").unwrap();
        std::fs::write(tmp.path().join(".git/HEAD"), "ref").unwrap();

        let connector = FilesystemConnector::new(config(tmp.path()));
        let first = connector.fetch_next_batch(2).await.unwrap();
        let second = connector.fetch_next_batch(2).await.unwrap();
        let third = connector.fetch_next_batch(2).await.unwrap();

        let names: Vec<&str> = first.iter().chain(&second).map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.txt", "c.md"]);
        assert!(third.is_empty());
        assert_eq!(first[0].declared_mime, "application/pdf");
        assert_eq!(second[0].tags.get("path").map(String::as_str), Some("logs/c.md"));
        assert_eq!(second[0].tags.get("department").map(String::as_str), Some("maintenance"));
    }

    #[test]
    fn test_document_id_is_stable() {
        assert_eq!(
            FilesystemConnector::document_id("logs/c.md"),
            FilesystemConnector::document_id("logs/c.md")
        );
        assert_ne!(
            FilesystemConnector::document_id("a"),
            FilesystemConnector::document_id("b")
        );
        assert_eq!(FilesystemConnector::document_id("a").len(), 32);
    }

    #[test]
    fn test_missing_root_fails() {
        let cfg = config(Path::new("/definitely/not/here"));
        assert!(scan_filesystem(&cfg).is_err());
    }
}
