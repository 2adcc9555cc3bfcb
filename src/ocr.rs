//! OCR through the Tesseract command-line tool.
//!
//! Runs `tesseract <image> stdout -l <language>` and returns its standard
//! output. Called from the extraction worker pool, so it blocks freely.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::traits::OcrEngine;

pub struct TesseractOcr {
    command: PathBuf,
}

impl TesseractOcr {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image_path: &Path, language: &str) -> Result<String> {
        let failed = |reason: String| Error::ExtractionFailed {
            path: image_path.display().to_string(),
            reason,
        };

        let output = Command::new(&self.command)
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .output()
            .map_err(|e| failed(format!("failed to run {}: {}", self.command.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
