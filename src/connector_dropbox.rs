//! Dropbox connector.
//!
//! Talks to the Dropbox HTTP API v2 directly with `reqwest`:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | first listing page | `POST /2/files/list_folder` (recursive, root `""`) |
//! | next listing page | `POST /2/files/list_folder/continue` |
//! | file bytes | `POST content.dropboxapi.com/2/files/download` |
//!
//! # Authentication
//!
//! A long-lived access token from `[storage.dropbox].access_token` or the
//! `DROPBOX_ACCESS_TOKEN` environment variable. Without a token the
//! connector still constructs, but every call reports
//! [`Error::RemoteUnavailable`] so the pipeline can degrade gracefully.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::{parse_timestamp, RemoteFileRecord};
use crate::traits::{ListPage, StorageProvider};

const API_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

pub struct DropboxConnector {
    token: Option<String>,
    client: reqwest::Client,
    api_base: String,
    content_base: String,
}

impl DropboxConnector {
    pub fn new(token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        if token.is_none() {
            tracing::warn!("DROPBOX_ACCESS_TOKEN not set; remote listing will be unavailable");
        }

        Ok(Self {
            token,
            client,
            api_base: API_BASE.to_string(),
            content_base: CONTENT_BASE.to_string(),
        })
    }

    /// Point the connector at a different API host (tests, proxies).
    pub fn with_base_urls(mut self, api_base: &str, content_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.content_base = content_base.trim_end_matches('/').to_string();
        self
    }

    fn token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| Error::RemoteUnavailable("Dropbox access token not configured".into()))
    }
}

// ============ Wire types ============

#[derive(Debug, Deserialize)]
struct ListFolderResponse {
    entries: Vec<Entry>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum Entry {
    File {
        path_lower: Option<String>,
        client_modified: String,
        #[serde(default)]
        size: u64,
    },
    #[serde(other)]
    Other,
}

#[async_trait]
impl StorageProvider for DropboxConnector {
    fn name(&self) -> &str {
        "dropbox"
    }

    async fn list_page(&self, cursor: Option<&str>) -> Result<ListPage> {
        let token = self.token()?;

        let (url, body) = match cursor {
            None => (
                format!("{}/files/list_folder", self.api_base),
                serde_json::json!({ "path": "", "recursive": true }),
            ),
            Some(c) => (
                format!("{}/files/list_folder/continue", self.api_base),
                serde_json::json!({ "cursor": c }),
            ),
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RemoteTransient(format!("Dropbox list_folder request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = format!(
                "Dropbox list_folder failed (HTTP {}): {}",
                status,
                text.chars().take(500).collect::<String>()
            );
            return Err(classify_status(status, detail));
        }

        let parsed: ListFolderResponse = resp
            .json()
            .await
            .map_err(|e| Error::RemoteTransient(format!("invalid list_folder response: {e}")))?;

        Ok(ListPage {
            entries: file_records(parsed.entries),
            next_cursor: parsed.has_more.then_some(parsed.cursor),
        })
    }

    async fn get_content(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let token = self.token()?;
        let arg = header_safe_json(&serde_json::json!({ "path": path }).to_string());

        let resp = self
            .client
            .post(format!("{}/files/download", self.content_base))
            .bearer_auth(token)
            .header("Dropbox-API-Arg", arg)
            .send()
            .await
            .map_err(|e| Error::RemoteTransient(format!("Dropbox download of {path} failed: {e}")))?;

        let status = resp.status();
        // 409 is Dropbox's "path/not_found" family of endpoint errors.
        if status == StatusCode::CONFLICT || status == StatusCode::NOT_FOUND {
            tracing::warn!(path, %status, "Dropbox could not locate file");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(classify_status(
                status,
                format!("Dropbox download failed (HTTP {}) for '{}'", status, path),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::RemoteTransient(format!("Dropbox download of {path} failed: {e}")))?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Keep file entries only, dropping those with unparseable metadata.
fn file_records(entries: Vec<Entry>) -> Vec<RemoteFileRecord> {
    entries
        .into_iter()
        .filter_map(|entry| match entry {
            Entry::File {
                path_lower: Some(path),
                client_modified,
                size,
            } => match parse_timestamp(&client_modified) {
                Some(ts) => Some(RemoteFileRecord::new(path, ts, size)),
                None => {
                    tracing::warn!(path = %path, client_modified = %client_modified, "skipping entry with bad timestamp");
                    None
                }
            },
            _ => None,
        })
        .collect()
}

/// Auth failures cannot be fixed by retrying; everything else might be.
fn classify_status(status: StatusCode, detail: String) -> Error {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Error::RemoteUnavailable(detail)
    } else {
        Error::RemoteTransient(detail)
    }
}

/// HTTP headers must be ASCII, so non-ASCII characters in the JSON argument
/// are escaped as `\uXXXX` (UTF-16 units).
fn header_safe_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_folder_page_and_keeps_files_only() {
        let body = r#"{
            "entries": [
                {".tag": "folder", "name": "docs", "path_lower": "/docs", "id": "id:1"},
                {".tag": "file", "name": "Report.pdf", "path_lower": "/docs/report.pdf",
                 "client_modified": "2024-01-01T00:00:00Z", "server_modified": "2024-01-02T00:00:00Z",
                 "size": 1234, "id": "id:2", "rev": "a1"},
                {".tag": "deleted", "name": "old.txt", "path_lower": "/old.txt"}
            ],
            "cursor": "AAE",
            "has_more": true
        }"#;
        let parsed: ListFolderResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.has_more);
        let records = file_records(parsed.entries);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "/docs/report.pdf");
        assert_eq!(records[0].size, 1234);
        assert_eq!(
            crate::models::format_timestamp(&records[0].last_modified),
            "2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn header_arg_escapes_non_ascii() {
        assert_eq!(
            header_safe_json(r#"{"path":"/café.txt"}"#),
            r#"{"path":"/caf\u00e9.txt"}"#
        );
        assert_eq!(header_safe_json("😀"), "\\ud83d\\ude00");
    }

    #[test]
    fn auth_failures_are_not_retried() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "x".into()),
            Error::RemoteUnavailable(_)
        ));
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "x".into()).is_transient());
    }

    #[tokio::test]
    async fn missing_token_reports_unavailable() {
        let dbx = DropboxConnector::new(None, Duration::from_secs(1)).unwrap();
        let err = dbx.list_page(None).await.unwrap_err();
        assert!(matches!(err, Error::RemoteUnavailable(_)));
    }
}
