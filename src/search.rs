//! Query execution and result shaping.
//!
//! The backend returns raw hits; [`QueryEngine`] turns each into a
//! [`SearchResultItem`] with a short display path such as `D../report.pdf`
//! (upper-cased first letter of the provider, then the file's base name).
//! Hits whose stored document lacks a required field are dropped with a
//! warning rather than failing the whole response.

use std::sync::Arc;

use crate::error::Result;
use crate::models::{base_name, SearchHit, SearchResultItem};
use crate::traits::{SearchBackend, SearchQuery};

/// Highlight fragments returned per hit.
pub const HIGHLIGHT_FRAGMENTS: usize = 3;
/// Approximate highlight fragment length in characters.
pub const HIGHLIGHT_FRAGMENT_SIZE: usize = 150;

pub struct QueryEngine {
    backend: Arc<dyn SearchBackend>,
    max_results: usize,
}

impl QueryEngine {
    pub fn new(backend: Arc<dyn SearchBackend>, max_results: usize) -> Self {
        Self {
            backend,
            max_results,
        }
    }

    /// Run a free-text query. A blank query yields no results.
    pub async fn search(&self, text: &str) -> Result<Vec<SearchResultItem>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let hits = self
            .backend
            .search(&SearchQuery {
                text: text.to_string(),
                size: self.max_results,
                fragments: HIGHLIGHT_FRAGMENTS,
                fragment_size: HIGHLIGHT_FRAGMENT_SIZE,
            })
            .await?;

        let total = hits.len();
        let items: Vec<SearchResultItem> = hits.into_iter().filter_map(shape_hit).collect();
        tracing::debug!(query = text, hits = total, returned = items.len(), "query executed");
        Ok(items)
    }
}

/// `uppercase(first letter of provider) + "../" + basename(file_path)`.
pub fn display_path(provider: &str, file_path: &str) -> String {
    let initial: String = provider
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_default();
    format!("{}../{}", initial, base_name(file_path))
}

fn shape_hit(hit: SearchHit) -> Option<SearchResultItem> {
    let source = &hit.source;
    let file_path = source.get("file_path").and_then(|v| v.as_str());
    let provider = source.get("provider").and_then(|v| v.as_str());
    let last_modified = source.get("last_modified").and_then(|v| v.as_str());
    let size = source.get("size").and_then(|v| v.as_u64());

    match (file_path, provider, last_modified, size) {
        (Some(file_path), Some(provider), Some(last_modified), Some(size)) => {
            Some(SearchResultItem {
                display_path: display_path(provider, file_path),
                file_path: file_path.to_string(),
                provider: provider.to_string(),
                score: hit.score,
                last_modified: last_modified.to_string(),
                size,
                highlights: hit.highlights,
            })
        }
        _ => {
            tracing::warn!(doc_id = %hit.id, "dropping search hit with incomplete source");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryBackend;
    use crate::models::{IndexedDocument, RemoteFileRecord};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn display_path_shapes() {
        assert_eq!(display_path("dropbox", "/docs/report.pdf"), "D../report.pdf");
        assert_eq!(display_path("s3", "/x.txt"), "S../x.txt");
        assert_eq!(display_path("", "/x.txt"), "../x.txt");
    }

    struct CannedBackend(Vec<SearchHit>);

    #[async_trait]
    impl SearchBackend for CannedBackend {
        async fn ensure_index(&self) -> Result<()> {
            Ok(())
        }
        async fn upsert(&self, _doc: &IndexedDocument) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _doc_id: &str) -> Result<bool> {
            Ok(false)
        }
        async fn list_ids(&self, _provider: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchHit>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn malformed_hits_are_dropped() {
        let good = SearchHit {
            id: "dropbox:/x.txt".into(),
            score: 2.0,
            source: json!({
                "file_path": "/x.txt",
                "provider": "dropbox",
                "last_modified": "2024-01-01T00:00:00Z",
                "size": 11
            }),
            highlights: vec!["<mark>hello</mark> world".into()],
        };
        let missing_size = SearchHit {
            id: "dropbox:/y.txt".into(),
            score: 1.0,
            source: json!({
                "file_path": "/y.txt",
                "provider": "dropbox",
                "last_modified": "2024-01-01T00:00:00Z"
            }),
            highlights: Vec::new(),
        };

        let engine = QueryEngine::new(Arc::new(CannedBackend(vec![good, missing_size])), 10);
        let items = engine.search("hello").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].display_path, "D../x.txt");
        assert_eq!(items[0].size, 11);
    }

    #[tokio::test]
    async fn blank_query_returns_nothing() {
        let engine = QueryEngine::new(Arc::new(CannedBackend(Vec::new())), 10);
        assert!(engine.search("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn respects_max_results() {
        let memory = Arc::new(MemoryBackend::new());
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..5 {
            let record = RemoteFileRecord::new(format!("/n{i}.txt"), ts, 4);
            memory
                .upsert(&IndexedDocument::from_record("dropbox", &record, "note".into(), 4))
                .await
                .unwrap();
        }
        let engine = QueryEngine::new(memory, 2);
        assert_eq!(engine.search("note").await.unwrap().len(), 2);
    }
}
