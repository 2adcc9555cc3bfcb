//! Core data models used throughout the sync-and-index pipeline.
//!
//! These types represent the remote file records, indexed documents, and
//! search results that flow between the lister, extractor, index writer and
//! query engine.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Canonical timestamp serialization used at every write site
/// (registry file, index documents).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a timestamp written by [`format_timestamp`] or any RFC 3339 value,
/// normalized to whole-second UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(0))
}

/// Serde adapter writing timestamps with [`format_timestamp`].
pub mod canonical_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

/// Metadata for one file in the remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRecord {
    /// Slash-rooted path as reported by the provider (e.g. `/docs/report.pdf`).
    pub path: String,
    /// Last modification time, truncated to whole seconds.
    pub last_modified: DateTime<Utc>,
    /// Remote size in bytes.
    pub size: u64,
}

impl RemoteFileRecord {
    pub fn new(path: impl Into<String>, last_modified: DateTime<Utc>, size: u64) -> Self {
        Self {
            path: path.into(),
            last_modified: last_modified.trunc_subsecs(0),
            size,
        }
    }

    /// Lower-case extension without the leading dot, or `""`.
    pub fn extension(&self) -> String {
        extension_of(&self.path)
    }
}

/// Lower-case extension of a slash-separated path, without the dot.
pub fn extension_of(path: &str) -> String {
    let name = base_name(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

/// Final component of a slash-separated path.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Natural key of an indexed document: `provider ":" path`.
pub fn doc_id(provider: &str, path: &str) -> String {
    format!("{}:{}", provider, path)
}

/// A document as written to the search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    #[serde(skip)]
    pub doc_id: String,
    pub file_path: String,
    pub provider: String,
    pub content: String,
    pub extension: String,
    #[serde(with = "canonical_timestamp")]
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

impl IndexedDocument {
    /// Build a document for `record`, deriving its id and extension.
    pub fn from_record(provider: &str, record: &RemoteFileRecord, content: String, size: u64) -> Self {
        Self {
            doc_id: doc_id(provider, &record.path),
            file_path: record.path.clone(),
            provider: provider.to_string(),
            content,
            extension: record.extension(),
            last_modified: record.last_modified,
            size,
        }
    }
}

/// A raw hit returned by a search backend, before shaping.
///
/// `source` is kept as untyped JSON so that hits with missing fields can be
/// dropped individually instead of failing the whole response.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub source: serde_json::Value,
    pub highlights: Vec<String>,
}

/// A shaped search result returned from the query engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResultItem {
    /// Presentation path, e.g. `D../report.pdf`. Not unique.
    pub display_path: String,
    pub file_path: String,
    pub provider: String,
    pub score: f64,
    pub last_modified: String,
    pub size: u64,
    pub highlights: Vec<String>,
}
