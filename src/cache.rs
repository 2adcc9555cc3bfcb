//! Local mirror of remote files used in cached mode.
//!
//! A remote path `/docs/a.pdf` is stored at `<download_dir>/docs/a.pdf`.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Location of the cached copy of `remote_path`.
    ///
    /// Fails for paths that would escape the cache root.
    pub fn local_path(&self, remote_path: &str) -> Result<PathBuf> {
        let relative = Path::new(remote_path.trim_start_matches('/'));
        let clean = relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !clean || relative.as_os_str().is_empty() {
            return Err(Error::CacheWrite {
                path: remote_path.to_string(),
                reason: "path escapes the cache directory".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    /// Write `bytes` for `remote_path`, creating parent directories, and
    /// verify the written length.
    pub async fn materialize(&self, remote_path: &str, bytes: &[u8]) -> Result<PathBuf> {
        let target = self.local_path(remote_path)?;
        let fail = |reason: String| Error::CacheWrite {
            path: remote_path.to_string(),
            reason,
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fail(format!("create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| fail(format!("write {}: {}", target.display(), e)))?;

        let written = tokio::fs::metadata(&target)
            .await
            .map_err(|e| fail(format!("stat {}: {}", target.display(), e)))?
            .len();
        if written != bytes.len() as u64 {
            return Err(fail(format!(
                "wrote {} bytes, expected {}",
                written,
                bytes.len()
            )));
        }

        tracing::debug!(path = remote_path, bytes = bytes.len(), "cached");
        Ok(target)
    }

    /// Remove the cached copy. Missing files are not an error.
    pub async fn evict(&self, remote_path: &str) -> Result<()> {
        let target = self.local_path(remote_path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                tracing::debug!(path = remote_path, "evicted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::CacheWrite {
                path: remote_path.to_string(),
                reason: format!("remove {}: {}", target.display(), e),
            }),
        }
    }
}
