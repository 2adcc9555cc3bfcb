//! Per-pass summary of what happened to each file.

use std::fmt;

/// Pipeline stage at which a file failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Cache,
    Extract,
    Index,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Download => "download",
            Stage::Cache => "cache",
            Stage::Extract => "extract",
            Stage::Index => "index",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Indexed,
    Skipped { reason: String },
    Failed { stage: Stage, reason: String },
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: String,
    pub outcome: FileOutcome,
}

/// Collected outcome of one sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub provider: String,
    /// Listing failed; nothing was mutated.
    pub remote_unavailable: bool,
    pub listed: usize,
    pub downloaded: usize,
    pub evicted: usize,
    pub deleted_from_index: usize,
    files: Vec<FileReport>,
}

impl SyncReport {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            ..Self::default()
        }
    }

    pub fn record_indexed(&mut self, path: &str) {
        self.push(path, FileOutcome::Indexed);
    }

    pub fn record_skipped(&mut self, path: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::info!(path, reason = %reason, "skipped");
        self.push(path, FileOutcome::Skipped { reason });
    }

    pub fn record_failed(&mut self, path: &str, stage: Stage, reason: impl fmt::Display) {
        let reason = reason.to_string();
        tracing::warn!(path, stage = %stage, error = %reason, "file failed");
        self.push(path, FileOutcome::Failed { stage, reason });
    }

    fn push(&mut self, path: &str, outcome: FileOutcome) {
        self.files.push(FileReport {
            path: path.to_string(),
            outcome,
        });
    }

    /// Outcome recorded for `path`, if any.
    pub fn outcome(&self, path: &str) -> Option<&FileOutcome> {
        self.files
            .iter()
            .rev()
            .find(|f| f.path == path)
            .map(|f| &f.outcome)
    }

    pub fn indexed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Indexed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.outcome)).count()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sync {}", self.provider)?;
        if self.remote_unavailable {
            writeln!(f, "  remote unavailable: index left unchanged")?;
            return write!(f, "degraded");
        }
        writeln!(f, "  listed: {} files", self.listed)?;
        writeln!(f, "  downloaded: {}", self.downloaded)?;
        writeln!(f, "  evicted: {}", self.evicted)?;
        writeln!(f, "  indexed: {}", self.indexed())?;
        writeln!(f, "  skipped: {}", self.skipped())?;
        writeln!(f, "  failed: {}", self.failed())?;
        writeln!(f, "  removed from index: {}", self.deleted_from_index)?;
        for file in &self.files {
            if let FileOutcome::Failed { stage, reason } = &file.outcome {
                writeln!(f, "    {} [{}]: {}", file.path, stage, reason)?;
            }
        }
        write!(f, "ok")
    }
}
