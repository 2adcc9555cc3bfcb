//! End-to-end sync pass scenarios.
//!
//! A local directory stands in for the remote account (filesystem provider),
//! the in-memory backend stands in for Elasticsearch, and OCR is stubbed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use cloud_search::config::{Config, FilesystemConnectorConfig};
use cloud_search::connector_fs::FilesystemConnector;
use cloud_search::error::{Error, Result};
use cloud_search::index::MemoryBackend;
use cloud_search::ingest::Orchestrator;
use cloud_search::report::FileOutcome;
use cloud_search::traits::OcrEngine;
use tempfile::TempDir;

/// 2024-01-01T00:00:00Z
const JAN_1: u64 = 1_704_067_200;

struct StubOcr {
    text: &'static str,
    broken: AtomicBool,
}

impl StubOcr {
    fn new(text: &'static str) -> Arc<Self> {
        Arc::new(Self {
            text,
            broken: AtomicBool::new(false),
        })
    }
}

impl OcrEngine for StubOcr {
    fn recognize(&self, image_path: &Path, _language: &str) -> Result<String> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::ExtractionFailed {
                path: image_path.display().to_string(),
                reason: "engine crashed".into(),
            });
        }
        Ok(self.text.to_string())
    }
}

struct Env {
    _tmp: TempDir,
    remote: PathBuf,
    config: Config,
}

impl Env {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let remote = tmp.path().join("remote");
        fs::create_dir_all(&remote).unwrap();

        let mut config = Config::default();
        config.storage.provider = "filesystem".into();
        config.storage.filesystem = Some(FilesystemConnectorConfig {
            root: remote.clone(),
            follow_symlinks: false,
        });
        config.cache.download_dir = tmp.path().join("data/downloads");
        config.cache.known_files_path = tmp.path().join("data/known_files.json");
        config.index.backend = "memory".into();
        config.extract.supported_formats =
            vec!["txt".into(), "pdf".into(), "csv".into(), "png".into()];

        Self {
            _tmp: tmp,
            remote,
            config,
        }
    }

    fn put(&self, rel: &str, bytes: &[u8], secs: u64) {
        let path = self.remote.join(rel.trim_start_matches('/'));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    fn orchestrator(&self, ocr: Arc<StubOcr>) -> (Orchestrator, Arc<MemoryBackend>) {
        let fs_cfg = self.config.storage.filesystem.clone().unwrap();
        let memory = Arc::new(MemoryBackend::new());
        let orch = Orchestrator::new(
            &self.config,
            Arc::new(FilesystemConnector::new(&fs_cfg)),
            memory.clone(),
            ocr,
        )
        .unwrap();
        (orch, memory)
    }

    fn registry_text(&self) -> String {
        fs::read_to_string(&self.config.cache.known_files_path).unwrap()
    }

    fn cached(&self, rel: &str) -> PathBuf {
        self.config
            .cache
            .download_dir
            .join(rel.trim_start_matches('/'))
    }
}

#[tokio::test]
async fn first_pass_imports_and_query_finds_file() {
    let env = Env::new();
    env.put("/x.txt", b"hello world", JAN_1);
    let (orch, memory) = env.orchestrator(StubOcr::new(""));

    let hits = orch.query("hello").await.unwrap();
    let paths: Vec<&str> = hits.iter().map(|h| h.display_path.as_str()).collect();
    assert_eq!(paths, vec!["F../x.txt"]);

    assert_eq!(
        env.registry_text(),
        "{\n  \"/x.txt\": \"2024-01-01T00:00:00Z\"\n}"
    );
    assert_eq!(fs::read(env.cached("/x.txt")).unwrap(), b"hello world");

    let doc = memory.get("filesystem:/x.txt").unwrap();
    assert_eq!(doc.content, "hello world");
    assert_eq!(doc.extension, "txt");
    assert_eq!(doc.size, 11);
    assert_eq!(memory.len(), 1);
}

#[tokio::test]
async fn second_pass_without_changes_is_a_no_op() {
    let env = Env::new();
    env.put("/a.txt", b"alpha", JAN_1);
    env.put("/docs/b.csv", b"k,v\n1,2", JAN_1);
    let (orch, memory) = env.orchestrator(StubOcr::new(""));

    let first = orch.sync_pass().await.unwrap();
    assert_eq!(first.downloaded, 2);
    let registry_before = env.registry_text();
    let docs_before = (
        memory.get("filesystem:/a.txt").unwrap(),
        memory.get("filesystem:/docs/b.csv").unwrap(),
    );

    let second = orch.sync_pass().await.unwrap();
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.deleted_from_index, 0);
    assert_eq!(env.registry_text(), registry_before);
    assert_eq!(memory.len(), 2);
    assert_eq!(memory.get("filesystem:/a.txt").unwrap(), docs_before.0);
    assert_eq!(memory.get("filesystem:/docs/b.csv").unwrap(), docs_before.1);
    assert_eq!(docs_before.1.content, "k v\n1 2");
}

#[tokio::test]
async fn changed_file_is_downloaded_again() {
    let env = Env::new();
    env.put("/a.txt", b"old words", JAN_1);
    let (orch, memory) = env.orchestrator(StubOcr::new(""));
    orch.sync_pass().await.unwrap();

    env.put("/a.txt", b"new words", JAN_1 + 60);
    let report = orch.sync_pass().await.unwrap();
    assert_eq!(report.downloaded, 1);
    assert_eq!(memory.get("filesystem:/a.txt").unwrap().content, "new words");
    assert!(env.registry_text().contains("2024-01-01T00:01:00Z"));
}

#[tokio::test]
async fn remote_deletion_removes_registry_cache_and_document() {
    let env = Env::new();
    env.put("/keep.txt", b"keep", JAN_1);
    env.put("/gone.txt", b"gone", JAN_1);
    let (orch, memory) = env.orchestrator(StubOcr::new(""));
    orch.sync_pass().await.unwrap();
    assert!(env.cached("/gone.txt").exists());

    fs::remove_file(env.remote.join("gone.txt")).unwrap();
    let report = orch.sync_pass().await.unwrap();

    assert_eq!(report.evicted, 1);
    assert_eq!(report.deleted_from_index, 1);
    assert!(!env.registry_text().contains("/gone.txt"));
    assert!(!env.cached("/gone.txt").exists());
    assert!(memory.get("filesystem:/gone.txt").is_none());
    assert!(memory.get("filesystem:/keep.txt").is_some());
}

#[tokio::test]
async fn blank_image_is_indexed_with_empty_content() {
    let env = Env::new();
    env.put("/scan.png", b"\x89PNG\r\n\x1a\n", JAN_1);
    let (orch, memory) = env.orchestrator(StubOcr::new("   \n"));

    let report = orch.sync_pass().await.unwrap();
    assert_eq!(report.outcome("/scan.png"), Some(&FileOutcome::Indexed));
    let doc = memory.get("filesystem:/scan.png").unwrap();
    assert_eq!(doc.content, "");
    assert_eq!(doc.extension, "png");
}

#[tokio::test]
async fn failed_extraction_keeps_previous_document() {
    let env = Env::new();
    env.put("/invoice.png", b"v1", JAN_1);
    let ocr = StubOcr::new("invoice total");
    let (orch, memory) = env.orchestrator(ocr.clone());
    orch.sync_pass().await.unwrap();
    assert_eq!(
        memory.get("filesystem:/invoice.png").unwrap().content,
        "invoice total"
    );

    env.put("/invoice.png", b"v2", JAN_1 + 3600);
    ocr.broken.store(true, Ordering::SeqCst);
    let report = orch.sync_pass().await.unwrap();

    assert!(matches!(
        report.outcome("/invoice.png"),
        Some(FileOutcome::Failed { .. })
    ));
    assert_eq!(report.deleted_from_index, 0);
    assert_eq!(
        memory.get("filesystem:/invoice.png").unwrap().content,
        "invoice total"
    );
}

#[tokio::test]
async fn size_limit_is_inclusive() {
    let mut env = Env::new();
    env.config.extract.max_file_size = 10;
    env.put("/exact.txt", b"0123456789", JAN_1);
    env.put("/over.txt", b"0123456789X", JAN_1);
    let (orch, memory) = env.orchestrator(StubOcr::new(""));

    let report = orch.sync_pass().await.unwrap();
    assert!(memory.get("filesystem:/exact.txt").is_some());
    assert!(memory.get("filesystem:/over.txt").is_none());
    assert!(matches!(
        report.outcome("/over.txt"),
        Some(FileOutcome::Skipped { reason }) if reason.contains("exceeds limit")
    ));
}

#[tokio::test]
async fn unsupported_files_are_cached_but_not_indexed() {
    let env = Env::new();
    env.put("/tool.exe", b"MZ", JAN_1);
    let (orch, memory) = env.orchestrator(StubOcr::new(""));

    orch.sync_pass().await.unwrap();
    assert!(memory.is_empty());
    assert!(env.registry_text().contains("/tool.exe"));
}

#[tokio::test]
async fn unavailable_remote_changes_nothing() {
    let env = Env::new();
    env.put("/a.txt", b"alpha", JAN_1);
    let (orch, memory) = env.orchestrator(StubOcr::new(""));
    orch.sync_pass().await.unwrap();
    let registry_before = env.registry_text();

    fs::remove_dir_all(&env.remote).unwrap();
    let report = orch.sync_pass().await.unwrap();

    assert!(report.remote_unavailable);
    assert_eq!(env.registry_text(), registry_before);
    assert!(env.cached("/a.txt").exists());
    assert_eq!(memory.len(), 1);

    let hits = orch.query("alpha").await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn lost_cache_copy_is_fetched_again() {
    let env = Env::new();
    env.put("/a.txt", b"alpha", JAN_1);
    let (orch, _memory) = env.orchestrator(StubOcr::new(""));
    orch.sync_pass().await.unwrap();

    fs::remove_file(env.cached("/a.txt")).unwrap();
    let report = orch.sync_pass().await.unwrap();
    assert_eq!(report.downloaded, 1);
    assert!(env.cached("/a.txt").exists());
}

#[tokio::test]
async fn direct_mode_leaves_cache_and_registry_alone() {
    let mut env = Env::new();
    env.config.cache.enabled = false;
    env.put("/x.txt", b"hello direct", JAN_1);
    env.put("/scan.png", b"img", JAN_1);
    let (orch, memory) = env.orchestrator(StubOcr::new("scanned words"));

    let hits = orch.query("direct").await.unwrap();
    assert_eq!(hits[0].display_path, "F../x.txt");
    assert_eq!(
        memory.get("filesystem:/scan.png").unwrap().content,
        "scanned words"
    );
    assert!(!env.config.cache.known_files_path.exists());
    assert!(!env.config.cache.download_dir.exists());

    fs::remove_file(env.remote.join("x.txt")).unwrap();
    let report = orch.sync_pass().await.unwrap();
    assert_eq!(report.deleted_from_index, 1);
    assert!(memory.get("filesystem:/x.txt").is_none());
}

#[tokio::test]
async fn query_only_mode_skips_sync() {
    let mut env = Env::new();
    env.config.sync.on_query = false;
    env.put("/x.txt", b"hello world", JAN_1);
    let (orch, _memory) = env.orchestrator(StubOcr::new(""));

    assert!(orch.query("hello").await.unwrap().is_empty());
    orch.sync_pass().await.unwrap();
    assert_eq!(orch.query("hello").await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_queries_are_serialized() {
    let env = Env::new();
    env.put("/x.txt", b"hello world", JAN_1);
    let (orch, memory) = env.orchestrator(StubOcr::new(""));
    let orch = Arc::new(orch);

    let a = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.query("hello").await }
    });
    let b = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.query("world").await }
    });

    assert_eq!(a.await.unwrap().unwrap().len(), 1);
    assert_eq!(b.await.unwrap().unwrap().len(), 1);
    assert_eq!(memory.len(), 1);
    assert_eq!(
        env.registry_text(),
        "{\n  \"/x.txt\": \"2024-01-01T00:00:00Z\"\n}"
    );
}

#[tokio::test]
async fn exclude_globs_hide_files() {
    let mut env = Env::new();
    env.config.storage.exclude_globs = vec!["tmp/**".into()];
    env.put("/tmp/scratch.txt", b"scratch", JAN_1);
    env.put("/real.txt", b"real", JAN_1);
    let (orch, memory) = env.orchestrator(StubOcr::new(""));

    let report = orch.sync_pass().await.unwrap();
    assert_eq!(report.listed, 1);
    assert!(memory.get("filesystem:/tmp/scratch.txt").is_none());
    assert!(memory.get("filesystem:/real.txt").is_some());
}

/// Single-page PDF showing "quarterly report" in Helvetica, with a correct
/// xref table so `pdf-extract` can parse it.
fn minimal_pdf() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 44 >> stream\nBT /F1 12 Tf 100 700 Td (quarterly report) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

#[tokio::test]
async fn pdf_text_is_searchable() {
    let env = Env::new();
    env.put("/reports/q3.pdf", &minimal_pdf(), JAN_1);
    let (orch, memory) = env.orchestrator(StubOcr::new(""));

    let hits = orch.query("quarterly").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].display_path, "F../q3.pdf");
    assert!(hits[0].highlights[0].contains("<mark>quarterly</mark>"));
    assert!(memory
        .get("filesystem:/reports/q3.pdf")
        .unwrap()
        .content
        .contains("report"));
}
