//! Search index writing and backend selection.
//!
//! [`IndexWriter`] is the only component that mutates the search index. It
//! owns schema creation, single-document upserts, and the orphan sweep that
//! removes documents whose remote file is gone or no longer eligible.

pub mod elasticsearch;
pub mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::models::IndexedDocument;
use crate::traits::SearchBackend;

pub use elasticsearch::ElasticsearchBackend;
pub use memory::MemoryBackend;

/// Build the backend named by `index.backend`.
pub fn create_backend(config: &IndexConfig) -> Result<Arc<dyn SearchBackend>> {
    match config.backend.as_str() {
        "elasticsearch" => Ok(Arc::new(ElasticsearchBackend::new(config)?)),
        "memory" => Ok(Arc::new(MemoryBackend::new())),
        other => Err(Error::Config(format!("unknown index backend: {other}"))),
    }
}

pub struct IndexWriter {
    backend: Arc<dyn SearchBackend>,
}

impl IndexWriter {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }

    /// Create the index if needed. Safe to call on every pass.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.backend.ensure_index().await
    }

    pub async fn upsert(&self, doc: &IndexedDocument) -> Result<()> {
        self.backend.upsert(doc).await?;
        tracing::debug!(doc_id = %doc.doc_id, chars = doc.content.len(), "indexed");
        Ok(())
    }

    /// Delete every document of `provider` whose id is not in `current_ids`.
    /// Returns how many documents were actually removed.
    pub async fn delete_missing(
        &self,
        provider: &str,
        current_ids: &HashSet<String>,
    ) -> Result<usize> {
        let indexed = self.backend.list_ids(provider).await?;
        let mut deleted = 0;
        for id in indexed.iter().filter(|id| !current_ids.contains(*id)) {
            if self.backend.delete(id).await? {
                tracing::info!(doc_id = %id, "removed orphaned document");
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
