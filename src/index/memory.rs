//! In-process [`SearchBackend`] for development and tests.
//!
//! Documents live in a `HashMap` behind `std::sync::RwLock`. Queries follow
//! the same clause structure as the Elasticsearch backend, with simplified
//! scoring:
//!
//! - `content`: every query word (lower-case alphanumeric run) must occur;
//!   scores one point per occurrence of a query word.
//! - `file_path`, `provider`, `extension`: whole-string equality, one point.
//! - `last_modified`: the query parses (RFC 3339 or `YYYY-MM-DD`) to the
//!   stored instant, one point.
//! - `size`: numeric equality, one point.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::models::{parse_timestamp, IndexedDocument, SearchHit};
use crate::traits::{SearchBackend, SearchQuery};

pub struct MemoryBackend {
    docs: RwLock<HashMap<String, IndexedDocument>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a stored document by id.
    pub fn get(&self, doc_id: &str) -> Option<IndexedDocument> {
        self.docs.read().ok()?.get(doc_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::IndexUnavailable("memory index lock poisoned".to_string())
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn ensure_index(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, doc: &IndexedDocument) -> Result<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        docs.insert(doc.doc_id.clone(), doc.clone());
        Ok(())
    }

    async fn delete(&self, doc_id: &str) -> Result<bool> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        Ok(docs.remove(doc_id).is_some())
    }

    async fn list_ids(&self, provider: &str) -> Result<Vec<String>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let mut ids: Vec<String> = docs
            .values()
            .filter(|d| d.provider == provider)
            .map(|d| d.doc_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let text = query.text.trim();
        let words = tokenize(text);
        let wanted: HashSet<&str> = words.iter().map(String::as_str).collect();
        let instant = parse_query_instant(text);
        let number = text.parse::<u64>().ok();

        let docs = self
            .docs
            .read()
            .map_err(|_| Error::QueryFailed("memory index lock poisoned".to_string()))?;

        let mut scored: Vec<(f64, &IndexedDocument, bool)> = Vec::new();
        for doc in docs.values() {
            let mut score = 0.0;

            let content_words = tokenize(&doc.content);
            let content_match = !wanted.is_empty()
                && wanted
                    .iter()
                    .all(|w| content_words.iter().any(|c| c == w));
            if content_match {
                score += content_words
                    .iter()
                    .filter(|c| wanted.contains(c.as_str()))
                    .count() as f64;
            }
            if doc.file_path == text {
                score += 1.0;
            }
            if doc.provider == text {
                score += 1.0;
            }
            if doc.extension == text {
                score += 1.0;
            }
            if instant == Some(doc.last_modified) {
                score += 1.0;
            }
            if number == Some(doc.size) {
                score += 1.0;
            }

            if score > 0.0 {
                scored.push((score, doc, content_match));
            }
        }

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.last_modified.cmp(&a.1.last_modified))
                .then_with(|| a.1.doc_id.cmp(&b.1.doc_id))
        });
        scored.truncate(query.size);

        scored
            .into_iter()
            .map(|(score, doc, content_match)| {
                let source = serde_json::to_value(doc)
                    .map_err(|e| Error::QueryFailed(format!("serialize {}: {}", doc.doc_id, e)))?;
                let highlights = if content_match {
                    highlight(&doc.content, &wanted, query.fragments, query.fragment_size)
                } else {
                    Vec::new()
                };
                Ok(SearchHit {
                    id: doc.doc_id.clone(),
                    score,
                    source,
                    highlights,
                })
            })
            .collect()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    word_spans(text)
        .into_iter()
        .map(|(start, end)| text[start..end].to_lowercase())
        .collect()
}

/// Byte ranges of maximal alphanumeric runs.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, ch) in text.char_indices() {
        match (ch.is_alphanumeric(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

fn parse_query_instant(text: &str) -> Option<DateTime<Utc>> {
    parse_timestamp(text).or_else(|| {
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    })
}

/// Byte length of the last `n` characters before `end`.
fn chars_before(text: &str, end: usize, n: usize) -> usize {
    text[..end].chars().rev().take(n).map(char::len_utf8).sum()
}

/// Byte length of the first `n` characters from `start`.
fn chars_after(text: &str, start: usize, n: usize) -> usize {
    text[start..].chars().take(n).map(char::len_utf8).sum()
}

/// Up to `max_fragments` non-overlapping windows of about `fragment_size`
/// characters around matching words, with every match inside a window
/// wrapped in `<mark>`.
fn highlight(
    content: &str,
    wanted: &HashSet<&str>,
    max_fragments: usize,
    fragment_size: usize,
) -> Vec<String> {
    let matches: Vec<(usize, usize)> = word_spans(content)
        .into_iter()
        .filter(|(s, e)| wanted.contains(content[*s..*e].to_lowercase().as_str()))
        .collect();

    let mut fragments = Vec::new();
    let mut covered_until = 0;
    for &(start, end) in &matches {
        if fragments.len() >= max_fragments {
            break;
        }
        if start < covered_until {
            continue;
        }
        let from = (start - chars_before(content, start, fragment_size / 4)).max(covered_until);
        let to = (from + chars_after(content, from, fragment_size)).max(end);

        let mut fragment = String::new();
        let mut cursor = from;
        for &(s, e) in matches.iter().filter(|(s, e)| *s >= from && *e <= to) {
            fragment.push_str(&content[cursor..s]);
            fragment.push_str("<mark>");
            fragment.push_str(&content[s..e]);
            fragment.push_str("</mark>");
            cursor = e;
        }
        fragment.push_str(&content[cursor..to]);
        fragments.push(fragment.trim().to_string());
        covered_until = to;
    }
    fragments
}
