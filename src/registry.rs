//! Persisted registry of remote files already materialized locally.
//!
//! The registry maps each remote path to the last-modified timestamp that was
//! downloaded, and is the only state that survives between passes in cached
//! mode. On disk it is a pretty-printed JSON object:
//!
//! ```json
//! {
//!   "/docs/report.pdf": "2024-01-01T00:00:00Z"
//! }
//! ```
//!
//! # Invariants
//!
//! - After a successful pass the key set equals the set of listed paths that
//!   were successfully materialized.
//! - Saves are atomic: the new content is written to a temporary file in the
//!   same directory and renamed over the target, so a crash never leaves a
//!   truncated registry behind.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::{format_timestamp, parse_timestamp, RemoteFileRecord};

/// In-memory form of the registry, ordered by path.
pub type KnownFiles = BTreeMap<String, DateTime<Utc>>;

pub struct KnownFileRegistry {
    path: PathBuf,
}

/// Result of comparing a listing with the registry.
#[derive(Debug, Default)]
pub struct RegistryDiff {
    /// Listed files that are absent from the registry or newer than it.
    pub new_or_changed: Vec<RemoteFileRecord>,
    /// Registry paths absent from the listing.
    pub deleted: Vec<String>,
}

impl KnownFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the registry.
    ///
    /// A missing file yields an empty registry. An unparseable file
    /// (including invalid UTF-8) is reported as a warning and also yields an
    /// empty registry, so the pass re-downloads everything. Entries with bad timestamps are dropped.
    pub async fn load(&self) -> Result<KnownFiles> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no registry yet, starting empty");
                return Ok(KnownFiles::new());
            }
            Err(e) => {
                return Err(Error::Registry(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        match parse_registry(&raw) {
            Ok(known) => Ok(known),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring registry");
                Ok(KnownFiles::new())
            }
        }
    }

    /// Atomically replace the registry file with `known`.
    pub async fn save(&self, known: &KnownFiles) -> Result<()> {
        let body = render_registry(known)?;
        let target = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, body.as_bytes()))
            .await
            .map_err(|e| Error::Registry(format!("registry save task failed: {e}")))?
    }
}

/// Partition `remote` against `known`.
///
/// A record is new-or-changed when its path is unknown or its timestamp is
/// strictly later than the stored one. Every known path missing from
/// `remote` is deleted.
pub fn diff(remote: &[RemoteFileRecord], known: &KnownFiles) -> RegistryDiff {
    let new_or_changed = remote
        .iter()
        .filter(|r| match known.get(&r.path) {
            Some(prev) => *prev < r.last_modified,
            None => true,
        })
        .cloned()
        .collect();

    let listed: HashSet<&str> = remote.iter().map(|r| r.path.as_str()).collect();
    let deleted = known
        .keys()
        .filter(|k| !listed.contains(k.as_str()))
        .cloned()
        .collect();

    RegistryDiff {
        new_or_changed,
        deleted,
    }
}

fn parse_registry(raw: &[u8]) -> Result<KnownFiles> {
    let entries: BTreeMap<String, serde_json::Value> =
        serde_json::from_slice(raw).map_err(|e| Error::RegistryCorrupt(e.to_string()))?;

    let mut known = KnownFiles::new();
    for (path, value) in entries {
        match value.as_str().and_then(parse_timestamp) {
            Some(ts) => {
                known.insert(path, ts);
            }
            None => tracing::warn!(path = %path, value = %value, "dropping registry entry with bad timestamp"),
        }
    }
    Ok(known)
}

fn render_registry(known: &KnownFiles) -> Result<String> {
    let serialized: BTreeMap<&str, String> = known
        .iter()
        .map(|(path, ts)| (path.as_str(), format_timestamp(ts)))
        .collect();
    serde_json::to_string_pretty(&serialized)
        .map_err(|e| Error::Registry(format!("failed to serialize registry: {e}")))
}

fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let io_err = |e: std::io::Error| Error::Registry(format!("failed to write {}: {}", target.display(), e));

    std::fs::create_dir_all(&dir).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(target).map_err(|e| io_err(e.error))?;
    Ok(())
}
