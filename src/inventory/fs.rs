//! Listing of metric files on the local filesystem.

use super::MetricLister;
use crate::error::{Error, Result};
use crate::types::{path_to_metric, MetricEntry, Node};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Lists metrics by walking a local storage directory.
#[derive(Debug, Clone)]
pub struct FsMetricLister {
    storage_dir: PathBuf,
}

impl FsMetricLister {
    /// Create a lister rooted at `storage_dir`.
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    /// The storage directory.
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn walk(root: &Path) -> Result<Vec<MetricEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for dirent in fs::read_dir(&dir)? {
                let dirent = dirent?;
                let file_type = dirent.file_type()?;
                let path = dirent.path();

                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                let Some(name) = relative.to_str().and_then(path_to_metric) else {
                    continue;
                };

                let metadata = dirent.metadata()?;
                let mtime = metadata
                    .modified()?
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                entries.push(MetricEntry::new(name, mtime, metadata.len()));
            }
        }

        Ok(entries)
    }
}

#[async_trait]
impl MetricLister for FsMetricLister {
    async fn list(&self, _node: &Node) -> Result<Vec<MetricEntry>> {
        let root = self.storage_dir.clone();
        tokio::task::spawn_blocking(move || Self::walk(&root))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}
