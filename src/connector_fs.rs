//! Local directory treated as the remote storage account.
//!
//! Useful for development and for exercising the full pipeline without
//! network access. The whole tree is returned as a single page.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::FilesystemConnectorConfig;
use crate::error::{Error, Result};
use crate::models::RemoteFileRecord;
use crate::traits::{ListPage, StorageProvider};

pub struct FilesystemConnector {
    root: PathBuf,
    follow_symlinks: bool,
}

impl FilesystemConnector {
    pub fn new(config: &FilesystemConnectorConfig) -> Self {
        Self {
            root: config.root.clone(),
            follow_symlinks: config.follow_symlinks,
        }
    }

    /// Map a slash-rooted remote path back to a file under the root,
    /// refusing anything that would escape it.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl StorageProvider for FilesystemConnector {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn list_page(&self, _cursor: Option<&str>) -> Result<ListPage> {
        let root = self.root.clone();
        let follow = self.follow_symlinks;
        let entries = tokio::task::spawn_blocking(move || scan_filesystem(&root, follow))
            .await
            .map_err(|e| Error::RemoteTransient(format!("filesystem scan task failed: {e}")))??;

        Ok(ListPage {
            entries,
            next_cursor: None,
        })
    }

    async fn get_content(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(full) = self.resolve(path) else {
            return Ok(None);
        };
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::RemoteTransient(format!(
                "failed to read {}: {}",
                full.display(),
                e
            ))),
        }
    }
}

fn scan_filesystem(root: &Path, follow_symlinks: bool) -> Result<Vec<RemoteFileRecord>> {
    if !root.is_dir() {
        return Err(Error::RemoteUnavailable(format!(
            "filesystem root does not exist: {}",
            root.display()
        )));
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(root).follow_links(follow_symlinks) {
        let entry =
            entry.map_err(|e| Error::RemoteTransient(format!("filesystem walk failed: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let metadata = entry
            .metadata()
            .map_err(|e| Error::RemoteTransient(format!("stat {} failed: {e}", rel_str)))?;
        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));

        records.push(RemoteFileRecord::new(
            format!("/{}", rel_str),
            modified,
            metadata.len(),
        ));
    }

    // Sort for deterministic ordering
    records.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(records)
}
