//! Error taxonomy for the sync-and-index pipeline.
//!
//! Every variant carries enough context (path, stage) to diagnose a failure
//! from the log line alone. Only [`Error::RemoteTransient`] is retried, by
//! the remote lister.

use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Listing or content fetch cannot proceed at all (missing credentials,
    /// provider refused the request, retries exhausted).
    #[error("remote storage unavailable: {0}")]
    RemoteUnavailable(String),

    /// A single provider call failed in a way that may succeed on retry
    /// (timeout, transport error, 5xx).
    #[error("remote call failed: {0}")]
    RemoteTransient(String),

    /// The persisted registry could not be parsed.
    #[error("known-file registry is corrupt: {0}")]
    RegistryCorrupt(String),

    /// The persisted registry could not be read or written.
    #[error("known-file registry I/O failed: {0}")]
    Registry(String),

    #[error("cache write failed for {path}: {reason}")]
    CacheWrite { path: String, reason: String },

    #[error("file {path} is {size} bytes, exceeds limit of {max} bytes")]
    FileTooLarge { path: String, size: u64, max: u64 },

    #[error("unsupported file type '{extension}' for {path}")]
    UnsupportedFormat { path: String, extension: String },

    #[error("text extraction failed for {path}: {reason}")]
    ExtractionFailed { path: String, reason: String },

    /// Schema creation, write, or id scan against the search engine failed.
    #[error("search index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("search query failed: {0}")]
    QueryFailed(String),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a retry of the same call might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RemoteTransient(_))
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
