//! Text extraction for the supported file formats.
//!
//! The file extension picks a [`FileKind`], and each kind has exactly one
//! extractor:
//!
//! | Kind | Extensions | Engine |
//! |------|------------|--------|
//! | [`FileKind::PlainText`] | `txt`, `md`, `log` | UTF-8 decode, invalid bytes dropped |
//! | [`FileKind::Table`] | `csv` | `csv` crate, cells joined by spaces |
//! | [`FileKind::Document`] | `pdf` | `pdf-extract`, pages in order |
//! | [`FileKind::Image`] | `png`, `jpg`, `jpeg`, `tif`, `tiff` | [`OcrEngine`] |
//!
//! PDF and OCR work is CPU-bound (or waits on a child process), so it runs
//! on the blocking thread pool, limited to `extract.workers` jobs at a time.
//! A panic inside a PDF parser surfaces as [`Error::ExtractionFailed`] for
//! that file only.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::ExtractConfig;
use crate::error::{Error, Result};
use crate::models::extension_of;
use crate::traits::OcrEngine;

/// Extraction strategy selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    PlainText,
    Table,
    Document,
    Image,
}

impl FileKind {
    /// Map a lower-case extension (without the dot) to its kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "txt" | "md" | "log" => Some(FileKind::PlainText),
            "csv" => Some(FileKind::Table),
            "pdf" => Some(FileKind::Document),
            "png" | "jpg" | "jpeg" | "tif" | "tiff" => Some(FileKind::Image),
            _ => None,
        }
    }
}

/// Canonical form of a configured format: no leading dot, lower-case.
pub fn normalize_format(format: &str) -> String {
    format.trim_start_matches('.').to_lowercase()
}

pub struct ContentExtractor {
    max_file_size: u64,
    supported: HashSet<String>,
    ocr: Arc<dyn OcrEngine>,
    ocr_language: String,
    pool: Arc<Semaphore>,
}

impl ContentExtractor {
    pub fn new(config: &ExtractConfig, ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            max_file_size: config.max_file_size,
            supported: config
                .supported_formats
                .iter()
                .map(|f| normalize_format(f))
                .collect(),
            ocr,
            ocr_language: config.ocr_language.clone(),
            pool: Arc::new(Semaphore::new(config.workers.max(1))),
        }
    }

    /// Check that a file of `size` bytes at `path` may be extracted.
    pub fn validate(&self, path: &str, size: u64) -> Result<FileKind> {
        if size > self.max_file_size {
            return Err(Error::FileTooLarge {
                path: path.to_string(),
                size,
                max: self.max_file_size,
            });
        }

        let extension = extension_of(path);
        let unsupported = || Error::UnsupportedFormat {
            path: path.to_string(),
            extension: extension.clone(),
        };
        if !self.supported.contains(&extension) {
            return Err(unsupported());
        }
        // Config validation guarantees every supported format has a kind.
        FileKind::from_extension(&extension).ok_or_else(unsupported)
    }

    /// Extract text from the cached copy of `remote_path` at `local`.
    pub async fn extract(&self, remote_path: &str, local: &Path) -> Result<String> {
        let failed = |reason: String| Error::ExtractionFailed {
            path: remote_path.to_string(),
            reason,
        };

        let size = tokio::fs::metadata(local)
            .await
            .map_err(|e| failed(format!("stat {}: {}", local.display(), e)))?
            .len();
        let kind = self.validate(remote_path, size)?;

        let text = match kind {
            FileKind::Image => self.ocr(remote_path, local.to_path_buf(), None).await?,
            _ => {
                let bytes = tokio::fs::read(local)
                    .await
                    .map_err(|e| failed(format!("read {}: {}", local.display(), e)))?;
                self.dispatch(remote_path, kind, bytes).await?
            }
        };
        Ok(self.finish(remote_path, kind, text))
    }

    /// Extract text from in-memory bytes (direct mode).
    pub async fn extract_bytes(&self, remote_path: &str, bytes: Vec<u8>) -> Result<String> {
        let kind = self.validate(remote_path, bytes.len() as u64)?;

        let text = match kind {
            FileKind::Image => {
                let suffix = format!(".{}", extension_of(remote_path));
                let tmp = tempfile::Builder::new()
                    .prefix("cloud-search-ocr-")
                    .suffix(&suffix)
                    .tempfile()
                    .map_err(|e| Error::ExtractionFailed {
                        path: remote_path.to_string(),
                        reason: format!("temp file: {e}"),
                    })?;
                tokio::fs::write(tmp.path(), &bytes)
                    .await
                    .map_err(|e| Error::ExtractionFailed {
                        path: remote_path.to_string(),
                        reason: format!("temp file write: {e}"),
                    })?;
                let image_path = tmp.path().to_path_buf();
                // `tmp` is moved into the job so it outlives the OCR run.
                self.ocr(remote_path, image_path, Some(tmp)).await?
            }
            _ => self.dispatch(remote_path, kind, bytes).await?,
        };
        Ok(self.finish(remote_path, kind, text))
    }

    async fn dispatch(&self, remote_path: &str, kind: FileKind, bytes: Vec<u8>) -> Result<String> {
        match kind {
            FileKind::PlainText => Ok(decode_text(&bytes)),
            FileKind::Table => extract_csv(remote_path, &bytes),
            FileKind::Document => {
                let path = remote_path.to_string();
                self.run_blocking(remote_path, move || extract_pdf(&path, &bytes))
                    .await
            }
            FileKind::Image => Err(Error::ExtractionFailed {
                path: remote_path.to_string(),
                reason: "image bytes must go through OCR".to_string(),
            }),
        }
    }

    async fn ocr(
        &self,
        remote_path: &str,
        image: std::path::PathBuf,
        guard: Option<tempfile::NamedTempFile>,
    ) -> Result<String> {
        let ocr = Arc::clone(&self.ocr);
        let language = self.ocr_language.clone();
        let path = remote_path.to_string();
        self.run_blocking(remote_path, move || {
            let _guard = guard;
            ocr.recognize(&image, &language).map_err(|e| match e {
                Error::ExtractionFailed { reason, .. } => Error::ExtractionFailed { path, reason },
                other => other,
            })
        })
        .await
    }

    /// Run `job` on the blocking pool once a worker permit is free.
    async fn run_blocking<F>(&self, remote_path: &str, job: F) -> Result<String>
    where
        F: FnOnce() -> Result<String> + Send + 'static,
    {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::ExtractionFailed {
                path: remote_path.to_string(),
                reason: format!("worker pool closed: {e}"),
            })?;

        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| Error::ExtractionFailed {
                path: remote_path.to_string(),
                reason: format!("extraction worker crashed: {e}"),
            })?
    }

    /// OCR output is whitespace-trimmed; other kinds are returned verbatim.
    fn finish(&self, remote_path: &str, kind: FileKind, text: String) -> String {
        let text = match kind {
            FileKind::Image => text.trim().to_string(),
            _ => text,
        };
        if text.trim().is_empty() && matches!(kind, FileKind::Image | FileKind::Document) {
            tracing::warn!(path = remote_path, kind = ?kind, "no text extracted");
        }
        text
    }
}

/// UTF-8 decode, dropping invalid byte sequences.
fn decode_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

/// Rows joined by `\n`, cells by a single space. No header row is assumed
/// and rows may have different lengths. Blank lines are not rows.
fn extract_csv(remote_path: &str, bytes: &[u8]) -> Result<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(|e| Error::ExtractionFailed {
            path: remote_path.to_string(),
            reason: format!("CSV parse error: {e}"),
        })?;
        let cells: Vec<String> = record.iter().map(decode_text).collect();
        rows.push(cells.join(" "));
    }
    Ok(rows.join("\n"))
}

fn extract_pdf(remote_path: &str, bytes: &[u8]) -> Result<String> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| {
        Error::ExtractionFailed {
            path: remote_path.to_string(),
            reason: format!("PDF extraction failed: {e}"),
        }
    })?;
    Ok(pages.concat())
}
