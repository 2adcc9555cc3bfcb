//! Elasticsearch backend over the REST API.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `ensure_index` | `HEAD /{index}`, then `PUT /{index}` with the mapping |
//! | `upsert` | `PUT /{index}/_doc/{id}?refresh=true` |
//! | `delete` | `DELETE /{index}/_doc/{id}?refresh=true` |
//! | `list_ids` | `POST /{index}/_search`, `term` on `provider`, `search_after` paging |
//! | `search` | `POST /{index}/_search` with the multi-field `bool` query |

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::IndexConfig;
use crate::connector_s3::uri_encode;
use crate::error::{Error, Result};
use crate::models::{IndexedDocument, SearchHit};
use crate::traits::{SearchBackend, SearchQuery};

/// Fields searched by every query, in clause order.
pub const SEARCH_FIELDS: [&str; 6] = [
    "content",
    "file_path",
    "provider",
    "extension",
    "last_modified",
    "size",
];

const ID_PAGE_SIZE: usize = 1000;

pub struct ElasticsearchBackend {
    client: reqwest::Client,
    base_url: String,
    index: String,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticsearchBackend {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .danger_accept_invalid_certs(!config.verify_certs)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index_name.clone(),
            username: config.username.clone(),
            password: config.resolve_password(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}{}", self.base_url, self.index, path);
        let req = self.client.request(method, url);
        match self.username {
            Some(ref user) => req.basic_auth(user, self.password.as_ref()),
            None => req,
        }
    }

    fn doc_path(doc_id: &str) -> String {
        format!("/_doc/{}?refresh=true", uri_encode(doc_id))
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<(StatusCode, String)> {
        let resp = req
            .send()
            .await
            .map_err(|e| Error::IndexUnavailable(format!("{what}: {e}")))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Ok((status, body))
    }
}

/// Index mapping: keyword fields for exact filters, analyzed `content`.
pub fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "file_path": { "type": "keyword" },
                "provider": { "type": "keyword" },
                "content": { "type": "text", "analyzer": "standard" },
                "extension": { "type": "keyword" },
                "last_modified": { "type": "date" },
                "size": { "type": "long" }
            }
        }
    })
}

/// Request body for a free-text query.
pub fn search_body(query: &SearchQuery) -> Value {
    let should: Vec<Value> = SEARCH_FIELDS
        .iter()
        .map(|field| {
            json!({
                "match": {
                    *field: {
                        "query": query.text,
                        "operator": "and",
                        "lenient": true
                    }
                }
            })
        })
        .collect();

    json!({
        "size": query.size,
        "query": {
            "bool": {
                "should": should,
                "minimum_should_match": 1
            }
        },
        "highlight": {
            "pre_tags": ["<mark>"],
            "post_tags": ["</mark>"],
            "fields": {
                "content": {
                    "fragment_size": query.fragment_size,
                    "number_of_fragments": query.fragments
                }
            }
        },
        "sort": [
            { "_score": { "order": "desc" } },
            { "last_modified": { "order": "desc" } }
        ]
    })
}

fn parse_hits(body: &Value) -> Vec<SearchHit> {
    body.pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .map(|hit| SearchHit {
                    id: hit["_id"].as_str().unwrap_or_default().to_string(),
                    score: hit["_score"].as_f64().unwrap_or(0.0),
                    source: hit.get("_source").cloned().unwrap_or(Value::Null),
                    highlights: hit
                        .pointer("/highlight/content")
                        .and_then(Value::as_array)
                        .map(|frags| {
                            frags
                                .iter()
                                .filter_map(|f| f.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn is_already_exists(body: &str) -> bool {
    body.contains("resource_already_exists_exception")
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    async fn ensure_index(&self) -> Result<()> {
        let (status, _) = self
            .send(self.request(Method::HEAD, ""), "index existence check")
            .await?;
        if status.is_success() {
            return Ok(());
        }
        if status != StatusCode::NOT_FOUND {
            return Err(Error::IndexUnavailable(format!(
                "HEAD {} returned {}",
                self.index, status
            )));
        }

        let (status, body) = self
            .send(
                self.request(Method::PUT, "").json(&index_mapping()),
                "index creation",
            )
            .await?;
        if status.is_success() || is_already_exists(&body) {
            tracing::info!(index = %self.index, "search index ready");
            Ok(())
        } else {
            Err(Error::IndexUnavailable(format!(
                "creating index {} failed (HTTP {}): {}",
                self.index, status, body
            )))
        }
    }

    async fn upsert(&self, doc: &IndexedDocument) -> Result<()> {
        let (status, body) = self
            .send(
                self.request(Method::PUT, &Self::doc_path(&doc.doc_id)).json(doc),
                "document write",
            )
            .await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::IndexUnavailable(format!(
                "indexing {} failed (HTTP {}): {}",
                doc.doc_id, status, body
            )))
        }
    }

    async fn delete(&self, doc_id: &str) -> Result<bool> {
        let (status, body) = self
            .send(
                self.request(Method::DELETE, &Self::doc_path(doc_id)),
                "document delete",
            )
            .await?;
        match status {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(Error::IndexUnavailable(format!(
                "deleting {} failed (HTTP {}): {}",
                doc_id, s, body
            ))),
        }
    }

    async fn list_ids(&self, provider: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut search_after: Option<Value> = None;

        loop {
            let mut body = json!({
                "size": ID_PAGE_SIZE,
                "_source": false,
                "query": { "term": { "provider": provider } },
                "sort": [{ "file_path": "asc" }]
            });
            if let Some(ref after) = search_after {
                body["search_after"] = after.clone();
            }

            let (status, text) = self
                .send(
                    self.request(Method::POST, "/_search").json(&body),
                    "document id scan",
                )
                .await?;
            if !status.is_success() {
                return Err(Error::IndexUnavailable(format!(
                    "id scan failed (HTTP {}): {}",
                    status, text
                )));
            }
            let parsed: Value = serde_json::from_str(&text)
                .map_err(|e| Error::IndexUnavailable(format!("invalid id scan response: {e}")))?;
            let hits = parsed
                .pointer("/hits/hits")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for hit in &hits {
                if let Some(id) = hit["_id"].as_str() {
                    ids.push(id.to_string());
                }
            }

            match hits.last().and_then(|h| h.get("sort")) {
                Some(sort) if hits.len() == ID_PAGE_SIZE => search_after = Some(sort.clone()),
                _ => break,
            }
        }

        Ok(ids)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let resp = self
            .request(Method::POST, "/_search")
            .json(&search_body(query))
            .send()
            .await
            .map_err(|e| Error::QueryFailed(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::QueryFailed(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::QueryFailed(format!("HTTP {}: {}", status, text)));
        }
        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| Error::QueryFailed(format!("invalid search response: {e}")))?;
        Ok(parse_hits(&parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_body_matches_every_field() {
        let body = search_body(&SearchQuery {
            text: "hello".into(),
            size: 10,
            fragments: 3,
            fragment_size: 150,
        });
        let should = body.pointer("/query/bool/should").unwrap().as_array().unwrap();
        assert_eq!(should.len(), 6);
        assert_eq!(should[0]["match"]["content"]["operator"], "and");
        assert_eq!(should[4]["match"]["last_modified"]["lenient"], true);
        assert_eq!(body["highlight"]["pre_tags"][0], "<mark>");
        assert_eq!(
            body["highlight"]["fields"]["content"]["number_of_fragments"],
            3
        );
        assert_eq!(body["sort"][1]["last_modified"]["order"], "desc");
        assert_eq!(body["size"], 10);
    }

    #[test]
    fn hits_are_parsed_with_highlights() {
        let body = json!({
            "hits": { "hits": [
                {
                    "_id": "dropbox:/x.txt",
                    "_score": 1.5,
                    "_source": { "file_path": "/x.txt" },
                    "highlight": { "content": ["<mark>hello</mark> world"] }
                },
                { "_id": "dropbox:/y.txt", "_score": null, "_source": {} }
            ]}
        });
        let hits = parse_hits(&body);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].highlights, vec!["<mark>hello</mark> world"]);
        assert_eq!(hits[1].score, 0.0);
        assert!(hits[1].highlights.is_empty());
    }

    #[test]
    fn mapping_declares_field_types() {
        let mapping = index_mapping();
        let props = &mapping["mappings"]["properties"];
        assert_eq!(props["file_path"]["type"], "keyword");
        assert_eq!(props["content"]["type"], "text");
        assert_eq!(props["last_modified"]["type"], "date");
        assert_eq!(props["size"]["type"], "long");
    }

    #[test]
    fn doc_ids_are_path_encoded() {
        assert_eq!(
            ElasticsearchBackend::doc_path("dropbox:/a b.txt"),
            "/_doc/dropbox%3A%2Fa%20b.txt?refresh=true"
        );
    }
}
