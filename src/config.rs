//! TOML configuration parsing and validation.
//!
//! Every section is optional and falls back to the defaults below, so a
//! config file only needs to name what differs. Secrets can also come from
//! the environment (`DROPBOX_ACCESS_TOKEN`, `ELASTICSEARCH_PASSWORD`, and the
//! usual `AWS_*` variables read by the S3 connector).
//!
//! ```toml
//! [storage]
//! provider = "dropbox"
//!
//! [cache]
//! enabled = true
//! download_dir = "./data/downloads"
//! known_files_path = "./data/known_files.json"
//!
//! [index]
//! backend = "elasticsearch"
//! url = "http://localhost:9200"
//! index_name = "cloud_search"
//!
//! [extract]
//! max_file_size = 600000
//! supported_formats = ["txt", "pdf", "csv", "png"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::extract::{normalize_format, FileKind};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============ Storage ============

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `dropbox`, `s3`, or `filesystem`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub dropbox: DropboxConfig,
    pub s3: Option<S3ConnectorConfig>,
    pub filesystem: Option<FilesystemConnectorConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            exclude_globs: Vec::new(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            dropbox: DropboxConfig::default(),
            s3: None,
            filesystem: None,
        }
    }
}

fn default_provider() -> String {
    "dropbox".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DropboxConfig {
    /// Falls back to `DROPBOX_ACCESS_TOKEN` when unset.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl DropboxConfig {
    /// Token from the config file, else from the environment.
    pub fn resolve_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("DROPBOX_ACCESS_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3ConnectorConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub follow_symlinks: bool,
}

// ============ Cache ============

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Cached mode when true, direct mode when false.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_known_files_path")]
    pub known_files_path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            download_dir: default_download_dir(),
            known_files_path: default_known_files_path(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("./data/downloads")
}
fn default_known_files_path() -> PathBuf {
    PathBuf::from("./data/known_files.json")
}

// ============ Index ============

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `elasticsearch` or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Falls back to `ELASTICSEARCH_PASSWORD` when unset.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub verify_certs: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_index_url(),
            index_name: default_index_name(),
            username: None,
            password: None,
            verify_certs: false,
            timeout_secs: default_timeout_secs(),
            max_results: default_max_results(),
        }
    }
}

impl IndexConfig {
    pub fn resolve_password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var("ELASTICSEARCH_PASSWORD").ok())
    }
}

fn default_backend() -> String {
    "elasticsearch".to_string()
}
fn default_index_url() -> String {
    "http://localhost:9200".to_string()
}
fn default_index_name() -> String {
    "cloud_search".to_string()
}
fn default_max_results() -> usize {
    10
}

// ============ Extraction ============

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_supported_formats")]
    pub supported_formats: Vec<String>,
    #[serde(default = "default_tesseract_cmd")]
    pub tesseract_cmd: PathBuf,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    /// Size of the blocking pool used for PDF and OCR work.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            supported_formats: default_supported_formats(),
            tesseract_cmd: default_tesseract_cmd(),
            ocr_language: default_ocr_language(),
            workers: default_workers(),
        }
    }
}

fn default_max_file_size() -> u64 {
    600_000
}
fn default_supported_formats() -> Vec<String> {
    ["txt", "pdf", "csv", "png"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_tesseract_cmd() -> PathBuf {
    PathBuf::from("/usr/bin/tesseract")
}
fn default_ocr_language() -> String {
    "eng".to_string()
}
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(2)
}

// ============ Sync scheduling ============

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Run a full sync pass before every query.
    #[serde(default = "default_true")]
    pub on_query: bool,
    /// Background sync period in seconds; 0 disables it.
    #[serde(default)]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            on_query: true,
            interval_secs: 0,
        }
    }
}

// ============ Server / logging ============

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============ Loading ============

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.storage.provider.as_str() {
        "dropbox" => {}
        "s3" => {
            if config.storage.s3.is_none() {
                bail!("storage.provider is 's3' but [storage.s3] is missing");
            }
        }
        "filesystem" => {
            if config.storage.filesystem.is_none() {
                bail!("storage.provider is 'filesystem' but [storage.filesystem] is missing");
            }
        }
        other => bail!(
            "Unknown storage provider: '{}'. Must be dropbox, s3, or filesystem.",
            other
        ),
    }

    match config.index.backend.as_str() {
        "elasticsearch" | "memory" => {}
        other => bail!(
            "Unknown index backend: '{}'. Must be elasticsearch or memory.",
            other
        ),
    }

    if config.index.max_results == 0 {
        bail!("index.max_results must be >= 1");
    }
    if config.extract.max_file_size == 0 {
        bail!("extract.max_file_size must be > 0");
    }
    if config.extract.workers == 0 {
        bail!("extract.workers must be >= 1");
    }
    if config.storage.timeout_secs == 0 || config.index.timeout_secs == 0 {
        bail!("timeout_secs must be > 0");
    }

    for format in &config.extract.supported_formats {
        if FileKind::from_extension(&normalize_format(format)).is_none() {
            bail!(
                "extract.supported_formats contains '{}', which has no extractor",
                format
            );
        }
    }

    Ok(())
}
