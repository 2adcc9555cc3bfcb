//! HTTP endpoint tests against a server bound to an ephemeral port.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use cloud_search::config::{Config, FilesystemConnectorConfig};
use cloud_search::connector_fs::FilesystemConnector;
use cloud_search::error::Result;
use cloud_search::index::MemoryBackend;
use cloud_search::ingest::Orchestrator;
use cloud_search::server::router;
use cloud_search::traits::OcrEngine;
use tempfile::TempDir;

struct NoOcr;

impl OcrEngine for NoOcr {
    fn recognize(&self, _image_path: &std::path::Path, _language: &str) -> Result<String> {
        Ok(String::new())
    }
}

/// Start a server over a remote directory holding `files`; returns the base
/// URL and the temp dir keeping everything alive.
async fn start(files: &[(&str, &str)], remote_exists: bool) -> (String, TempDir) {
    let tmp = TempDir::new().unwrap();
    let remote = tmp.path().join("remote");
    if remote_exists {
        fs::create_dir_all(&remote).unwrap();
    }
    for (name, body) in files {
        let path = remote.join(name);
        fs::write(&path, body).unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(UNIX_EPOCH + Duration::from_secs(1_704_067_200))
            .unwrap();
    }

    let mut config = Config::default();
    let fs_cfg = FilesystemConnectorConfig {
        root: remote,
        follow_symlinks: false,
    };
    config.storage.provider = "filesystem".into();
    config.storage.filesystem = Some(fs_cfg.clone());
    config.cache.download_dir = tmp.path().join("downloads");
    config.cache.known_files_path = tmp.path().join("known_files.json");
    config.index.backend = "memory".into();

    let orchestrator = Orchestrator::new(
        &config,
        Arc::new(FilesystemConnector::new(&fs_cfg)),
        Arc::new(MemoryBackend::new()),
        Arc::new(NoOcr),
    )
    .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(Arc::new(orchestrator)))
            .await
            .unwrap();
    });

    (format!("http://{}", addr), tmp)
}

#[tokio::test]
async fn search_returns_plain_text_display_paths() {
    let (base, _tmp) = start(&[("x.txt", "hello world"), ("y.txt", "goodbye")], true).await;

    let resp = reqwest::get(format!("{}/api/v1/search?q=hello", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    assert_eq!(resp.text().await.unwrap(), "F../x.txt");
}

#[tokio::test]
async fn multiple_hits_are_newline_separated() {
    let (base, _tmp) = start(&[("a.txt", "shared word"), ("b.txt", "shared term")], true).await;

    let body = reqwest::get(format!("{}/api/v1/search?q=shared", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let mut lines: Vec<&str> = body.lines().collect();
    lines.sort();
    assert_eq!(lines, vec!["F../a.txt", "F../b.txt"]);
}

#[tokio::test]
async fn empty_query_is_bad_request() {
    let (base, _tmp) = start(&[], true).await;

    for url in [
        format!("{}/api/v1/search?q=", base),
        format!("{}/api/v1/search?q=%20%20", base),
        format!("{}/api/v1/search", base),
    ] {
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 400, "{}", url);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }
}

#[tokio::test]
async fn unavailable_remote_still_answers() {
    let (base, _tmp) = start(&[], false).await;

    let resp = reqwest::get(format!("{}/api/v1/search?q=anything", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "");
}

#[tokio::test]
async fn health_reports_version() {
    let (base, _tmp) = start(&[], true).await;

    let body: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

struct BrokenIndex;

#[async_trait::async_trait]
impl cloud_search::traits::SearchBackend for BrokenIndex {
    async fn ensure_index(&self) -> Result<()> {
        Err(cloud_search::error::Error::IndexUnavailable(
            "connection refused".into(),
        ))
    }
    async fn upsert(&self, _doc: &cloud_search::models::IndexedDocument) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _doc_id: &str) -> Result<bool> {
        Ok(false)
    }
    async fn list_ids(&self, _provider: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn search(
        &self,
        _query: &cloud_search::traits::SearchQuery,
    ) -> Result<Vec<cloud_search::models::SearchHit>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn pipeline_failure_is_search_failed() {
    let tmp = TempDir::new().unwrap();
    let fs_cfg = FilesystemConnectorConfig {
        root: tmp.path().to_path_buf(),
        follow_symlinks: false,
    };
    let mut config = Config::default();
    config.cache.download_dir = tmp.path().join("downloads");
    config.cache.known_files_path = tmp.path().join("known_files.json");
    let orchestrator = Orchestrator::new(
        &config,
        Arc::new(FilesystemConnector::new(&fs_cfg)),
        Arc::new(BrokenIndex),
        Arc::new(NoOcr),
    )
    .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(Arc::new(orchestrator)))
            .await
            .unwrap();
    });

    let resp = reqwest::get(format!("http://{}/api/v1/search?q=x", addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "search_failed");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Search failed: "));
}
