//! Capability traits at the seams of the pipeline.
//!
//! The orchestrator only talks to remote storage, the search engine and the
//! OCR engine through these traits, so adding a provider or backend never
//! touches the pipeline itself.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │  StorageProvider   │──▶│ Orchestrator │──▶│   SearchBackend    │
//! │ Dropbox / S3 / FS  │   │              │   │ Elasticsearch/Mem  │
//! └────────────────────┘   └──────┬───────┘   └────────────────────┘
//!                                 ▼
//!                          ┌──────────────┐
//!                          │  OcrEngine   │
//!                          │  Tesseract   │
//!                          └──────────────┘
//! ```

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::models::{IndexedDocument, RemoteFileRecord, SearchHit};

// ═══════════════════════════════════════════════════════════════════════
// Storage provider
// ═══════════════════════════════════════════════════════════════════════

/// One page of a remote listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// File entries on this page. Directories are never included.
    pub entries: Vec<RemoteFileRecord>,
    /// Opaque cursor for the next page; `None` when the listing is complete.
    pub next_cursor: Option<String>,
}

/// A remote storage account that can be enumerated and read.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use cloud_search::error::Result;
/// use cloud_search::traits::{ListPage, StorageProvider};
///
/// pub struct EmptyBucket;
///
/// #[async_trait]
/// impl StorageProvider for EmptyBucket {
///     fn name(&self) -> &str { "empty" }
///
///     async fn list_page(&self, _cursor: Option<&str>) -> Result<ListPage> {
///         Ok(ListPage::default())
///     }
///
///     async fn get_content(&self, _path: &str) -> Result<Option<Vec<u8>>> {
///         Ok(None)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Provider label stored on every document (e.g. `"dropbox"`).
    fn name(&self) -> &str;

    /// Fetch one page of the listing. `cursor` is `None` for the first page.
    ///
    /// Returns [`Error::RemoteUnavailable`](crate::error::Error::RemoteUnavailable)
    /// when the listing cannot start, and
    /// [`Error::RemoteTransient`](crate::error::Error::RemoteTransient) for
    /// failures worth retrying.
    async fn list_page(&self, cursor: Option<&str>) -> Result<ListPage>;

    /// Fetch a file's bytes. `Ok(None)` means the object could not be located.
    async fn get_content(&self, path: &str) -> Result<Option<Vec<u8>>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Search backend
// ═══════════════════════════════════════════════════════════════════════

/// Query parameters handed to a [`SearchBackend`].
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    /// Maximum number of hits.
    pub size: usize,
    /// Maximum highlight fragments per hit.
    pub fragments: usize,
    /// Approximate highlight fragment length in characters.
    pub fragment_size: usize,
}

/// A search engine holding [`IndexedDocument`]s.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Create the index with the fixed mapping if it does not exist yet.
    async fn ensure_index(&self) -> Result<()>;

    /// Create or overwrite a document keyed by `doc.doc_id`. The document
    /// must be visible to searches once this returns.
    async fn upsert(&self, doc: &IndexedDocument) -> Result<()>;

    /// Delete a document. Returns `false` if it was already gone.
    async fn delete(&self, doc_id: &str) -> Result<bool>;

    /// Every indexed document id belonging to `provider`.
    async fn list_ids(&self, provider: &str) -> Result<Vec<String>>;

    /// Execute the multi-field query.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;
}

// ═══════════════════════════════════════════════════════════════════════
// OCR
// ═══════════════════════════════════════════════════════════════════════

/// Text recognition over an image file.
///
/// Implementations are called from the blocking worker pool and may do
/// CPU-heavy work or wait on a child process.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image_path: &Path, language: &str) -> Result<String>;
}
