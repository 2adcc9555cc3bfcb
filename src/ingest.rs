//! Sync pass orchestration.
//!
//! Coordinates the full flow for one pass:
//!
//! ```text
//! cached:  schema → list → registry diff → download / evict → save registry
//!          → extract from cache → upsert → orphan sweep → query
//! direct:  schema → list → fetch bytes → extract → upsert → orphan sweep → query
//! ```
//!
//! Passes are single-flight: [`Orchestrator`] holds a `tokio::sync::Mutex`
//! for the duration of each pass, so concurrent queries queue behind the
//! running pass and then run their own (which finds nothing new).
//!
//! A listing that fails is never read as "everything was deleted": the pass
//! stops before touching the registry, cache, or index, and the query still
//! runs against the existing index.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::cache::LocalCache;
use crate::config::Config;
use crate::connector_dropbox::DropboxConnector;
use crate::connector_fs::FilesystemConnector;
use crate::connector_s3::S3Connector;
use crate::error::{Error, Result};
use crate::extract::ContentExtractor;
use crate::index::{create_backend, IndexWriter};
use crate::listing::RemoteLister;
use crate::models::{doc_id, IndexedDocument, RemoteFileRecord, SearchResultItem};
use crate::ocr::TesseractOcr;
use crate::registry::{diff, KnownFileRegistry};
use crate::report::{Stage, SyncReport};
use crate::search::QueryEngine;
use crate::traits::{OcrEngine, SearchBackend, StorageProvider};

/// Where the orchestrator is within a pass. Transitions are logged at
/// debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Listing,
    Diffing,
    Reconciling,
    Indexing,
    CleaningOrphans,
    Querying,
    Done,
    Failed,
}

/// Build the storage provider named by `storage.provider`.
pub fn create_provider(config: &Config) -> Result<Arc<dyn StorageProvider>> {
    let storage = &config.storage;
    let timeout = Duration::from_secs(storage.timeout_secs);
    match storage.provider.as_str() {
        "dropbox" => Ok(Arc::new(DropboxConnector::new(
            storage.dropbox.resolve_token(),
            timeout,
        )?)),
        "s3" => {
            let s3 = storage
                .s3
                .clone()
                .ok_or_else(|| Error::Config("[storage.s3] is missing".into()))?;
            Ok(Arc::new(S3Connector::new(s3, timeout)?))
        }
        "filesystem" => {
            let fs = storage
                .filesystem
                .as_ref()
                .ok_or_else(|| Error::Config("[storage.filesystem] is missing".into()))?;
            Ok(Arc::new(FilesystemConnector::new(fs)))
        }
        other => Err(Error::Config(format!("unknown storage provider: {other}"))),
    }
}

/// The parts of the pipeline shared with per-file tasks.
struct Workers {
    provider: String,
    lister: RemoteLister,
    extractor: ContentExtractor,
    writer: IndexWriter,
}

enum Source {
    Cached(PathBuf),
    Remote,
}

pub struct Orchestrator {
    workers: Arc<Workers>,
    registry: KnownFileRegistry,
    cache: LocalCache,
    engine: QueryEngine,
    cached_mode: bool,
    sync_on_query: bool,
    concurrency: usize,
    pass_lock: Mutex<()>,
    state: StdMutex<SyncState>,
}

impl Orchestrator {
    /// Assemble an orchestrator from explicit collaborators.
    pub fn new(
        config: &Config,
        provider: Arc<dyn StorageProvider>,
        backend: Arc<dyn SearchBackend>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Result<Self> {
        let lister = RemoteLister::new(
            Arc::clone(&provider),
            &config.storage.exclude_globs,
            config.storage.max_retries,
        )?;

        Ok(Self {
            workers: Arc::new(Workers {
                provider: provider.name().to_string(),
                lister,
                extractor: ContentExtractor::new(&config.extract, ocr),
                writer: IndexWriter::new(Arc::clone(&backend)),
            }),
            registry: KnownFileRegistry::new(&config.cache.known_files_path),
            cache: LocalCache::new(&config.cache.download_dir),
            engine: QueryEngine::new(backend, config.index.max_results),
            cached_mode: config.cache.enabled,
            sync_on_query: config.sync.on_query,
            concurrency: config.extract.workers.max(1) * 2,
            pass_lock: Mutex::new(()),
            state: StdMutex::new(SyncState::Idle),
        })
    }

    /// Assemble an orchestrator with the provider, backend, and OCR engine
    /// named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = create_provider(config)?;
        let backend = create_backend(&config.index)?;
        let ocr = Arc::new(TesseractOcr::new(&config.extract.tesseract_cmd));
        Self::new(config, provider, backend, ocr)
    }

    pub fn provider_name(&self) -> &str {
        &self.workers.provider
    }

    pub fn state(&self) -> SyncState {
        self.state.lock().map(|s| *s).unwrap_or(SyncState::Failed)
    }

    fn transition(&self, next: SyncState) {
        if let Ok(mut state) = self.state.lock() {
            tracing::debug!(from = ?*state, to = ?next, "sync state");
            *state = next;
        }
    }

    /// Run one sync pass, waiting for any pass already in flight.
    pub async fn sync_pass(&self) -> Result<SyncReport> {
        let _guard = self.pass_lock.lock().await;
        let report = self.run_pass().await?;
        self.transition(SyncState::Done);
        Ok(report)
    }

    /// Answer a free-text query, synchronizing first when `sync.on_query`
    /// is set.
    pub async fn query(&self, text: &str) -> Result<Vec<SearchResultItem>> {
        if !self.sync_on_query {
            return self.engine.search(text).await;
        }

        let _guard = self.pass_lock.lock().await;
        self.run_pass().await?;

        self.transition(SyncState::Querying);
        match self.engine.search(text).await {
            Ok(items) => {
                self.transition(SyncState::Done);
                Ok(items)
            }
            Err(e) => {
                self.transition(SyncState::Failed);
                Err(e)
            }
        }
    }

    /// Run a pass every `interval` until the returned task is aborted.
    pub fn spawn_background_sync(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = this.sync_pass().await {
                    tracing::error!(error = %e, "background sync failed");
                }
            }
        })
    }

    async fn run_pass(&self) -> Result<SyncReport> {
        let result = self.run_pass_inner().await;
        match result {
            Ok(ref report) => tracing::info!(
                provider = %report.provider,
                listed = report.listed,
                downloaded = report.downloaded,
                evicted = report.evicted,
                indexed = report.indexed(),
                skipped = report.skipped(),
                failed = report.failed(),
                removed = report.deleted_from_index,
                remote_unavailable = report.remote_unavailable,
                "sync pass complete"
            ),
            Err(ref e) => {
                self.transition(SyncState::Failed);
                tracing::error!(error = %e, "sync pass failed");
            }
        }
        result
    }

    async fn run_pass_inner(&self) -> Result<SyncReport> {
        let provider = self.workers.provider.clone();
        let mut report = SyncReport::new(&provider);

        self.transition(SyncState::Listing);
        self.workers.writer.ensure_schema().await?;

        let listing = match self.workers.lister.list().await {
            Ok(listing) => listing,
            Err(Error::RemoteUnavailable(reason)) => {
                tracing::warn!(provider = %provider, reason = %reason, "remote unavailable, leaving index unchanged");
                report.remote_unavailable = true;
                return Ok(report);
            }
            Err(e) => return Err(e),
        };
        report.listed = listing.len();

        // Eligibility depends only on the listing, so a failed extraction
        // never removes a previously indexed document.
        let mut current_ids = HashSet::new();
        let mut eligible = Vec::new();
        for record in &listing {
            match self.workers.extractor.validate(&record.path, record.size) {
                Ok(_) => {
                    // A path listed twice is indexed once.
                    if current_ids.insert(doc_id(&provider, &record.path)) {
                        eligible.push(record.clone());
                    }
                }
                Err(e) => report.record_skipped(&record.path, e.to_string()),
            }
        }

        let jobs = if self.cached_mode {
            self.reconcile_cache(&listing, eligible, &mut report).await?
        } else {
            eligible.into_iter().map(|r| (r, Source::Remote)).collect()
        };

        self.transition(SyncState::Indexing);
        self.index_files(jobs, &mut report).await;

        self.transition(SyncState::CleaningOrphans);
        report.deleted_from_index = self
            .workers
            .writer
            .delete_missing(&provider, &current_ids)
            .await?;

        Ok(report)
    }

    /// Bring the cache and registry in line with `listing`, returning the
    /// eligible files that now have a cached copy.
    async fn reconcile_cache(
        &self,
        listing: &[RemoteFileRecord],
        eligible: Vec<RemoteFileRecord>,
        report: &mut SyncReport,
    ) -> Result<Vec<(RemoteFileRecord, Source)>> {
        self.transition(SyncState::Diffing);
        let mut known = self.registry.load().await?;
        let changes = diff(listing, &known);

        // Registered files whose cached copy has disappeared are fetched again.
        let mut to_fetch = changes.new_or_changed;
        let queued: HashSet<String> = to_fetch.iter().map(|r| r.path.clone()).collect();
        let mut lost: HashSet<String> = HashSet::new();
        for record in listing {
            if queued.contains(&record.path)
                || lost.contains(&record.path)
                || !known.contains_key(&record.path)
            {
                continue;
            }
            let missing = match self.cache.local_path(&record.path) {
                Ok(local) => !tokio::fs::try_exists(&local).await.unwrap_or(false),
                Err(_) => false,
            };
            if missing {
                lost.insert(record.path.clone());
                to_fetch.push(record.clone());
            }
        }

        self.transition(SyncState::Reconciling);
        // One download attempt per path per pass, even if listed twice.
        let mut attempted: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        for record in &to_fetch {
            if !attempted.insert(record.path.clone()) {
                continue;
            }
            let path = record.path.as_str();
            let outcome = match self.workers.lister.get_content(path).await {
                Ok(Some(bytes)) => self
                    .cache
                    .materialize(path, &bytes)
                    .await
                    .map(Some)
                    .map_err(|e| (Stage::Cache, e)),
                Ok(None) => Ok(None),
                Err(e) => Err((Stage::Download, e)),
            };

            match outcome {
                Ok(Some(_)) => {
                    known.insert(record.path.clone(), record.last_modified);
                    report.downloaded += 1;
                }
                Ok(None) => {
                    failed.insert(record.path.clone());
                    report.record_skipped(path, "remote file could not be located");
                }
                Err((stage, e)) => {
                    failed.insert(record.path.clone());
                    report.record_failed(path, stage, e);
                }
            }
            // No local copy is left behind a failed re-fetch, so the entry goes too.
            if failed.contains(path) && lost.contains(path) {
                known.remove(path);
            }
        }

        for path in &changes.deleted {
            if let Err(e) = self.cache.evict(path).await {
                tracing::warn!(path = %path, error = %e, "could not evict cached copy");
            }
            known.remove(path);
            report.evicted += 1;
        }

        self.registry.save(&known).await?;

        let mut jobs = Vec::new();
        for record in eligible {
            if failed.contains(&record.path) || !known.contains_key(&record.path) {
                continue;
            }
            match self.cache.local_path(&record.path) {
                Ok(local) => jobs.push((record, Source::Cached(local))),
                Err(e) => report.record_failed(&record.path, Stage::Cache, e),
            }
        }
        Ok(jobs)
    }

    /// Extract and upsert each file, with at most `concurrency` files in
    /// flight. Per-file failures land in `report`.
    async fn index_files(&self, jobs: Vec<(RemoteFileRecord, Source)>, report: &mut SyncReport) {
        let limit = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (record, source) in jobs {
            let Ok(permit) = Arc::clone(&limit).acquire_owned().await else {
                break;
            };
            let workers = Arc::clone(&self.workers);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = index_one(&workers, &record, source).await;
                (record.path, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((path, Ok(true))) => report.record_indexed(&path),
                Ok((path, Ok(false))) => {
                    report.record_skipped(&path, "remote file could not be located")
                }
                Ok((path, Err((stage, e)))) => report.record_failed(&path, stage, e),
                Err(e) => tracing::error!(error = %e, "indexing task failed"),
            }
        }
    }
}

/// Extract one file and write its document. `Ok(false)` means the remote
/// object could not be located.
async fn index_one(
    workers: &Workers,
    record: &RemoteFileRecord,
    source: Source,
) -> std::result::Result<bool, (Stage, Error)> {
    let (content, size) = match source {
        Source::Cached(local) => {
            let text = workers
                .extractor
                .extract(&record.path, &local)
                .await
                .map_err(|e| (Stage::Extract, e))?;
            (text, record.size)
        }
        Source::Remote => {
            let bytes = match workers
                .lister
                .get_content(&record.path)
                .await
                .map_err(|e| (Stage::Download, e))?
            {
                Some(bytes) => bytes,
                None => return Ok(false),
            };
            let size = bytes.len() as u64;
            let text = workers
                .extractor
                .extract_bytes(&record.path, bytes)
                .await
                .map_err(|e| (Stage::Extract, e))?;
            (text, size)
        }
    };

    let doc = IndexedDocument::from_record(&workers.provider, record, content, size);
    workers
        .writer
        .upsert(&doc)
        .await
        .map_err(|e| (Stage::Index, e))?;
    Ok(true)
}
