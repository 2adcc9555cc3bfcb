//! Paginated remote listing with retries and exclusion globs.
//!
//! [`RemoteLister`] drives a [`StorageProvider`] page by page until the
//! provider stops returning a cursor. A page that fails transiently is
//! retried with a linear backoff; when the retries run out (or the provider
//! refuses to list at all) the whole listing is reported as
//! [`Error::RemoteUnavailable`]. Callers must never treat a failed listing as
//! an empty one.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::RemoteFileRecord;
use crate::traits::StorageProvider;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct RemoteLister {
    provider: Arc<dyn StorageProvider>,
    excludes: GlobSet,
    max_retries: u32,
    retry_delay: Duration,
}

impl RemoteLister {
    /// `exclude_globs` are matched against the path without its leading `/`.
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        exclude_globs: &[String],
        max_retries: u32,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            excludes: build_globset(exclude_globs)?,
            max_retries,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Base delay between page retries; attempt `n` waits `n * delay`.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Enumerate every remote file, following continuation cursors.
    pub async fn list(&self) -> Result<Vec<RemoteFileRecord>> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.fetch_page(cursor.as_deref()).await?;
            pages += 1;

            records.extend(
                page.entries
                    .into_iter()
                    .filter(|r| !self.is_excluded(&r.path)),
            );

            match page.next_cursor {
                Some(next) if Some(&next) == cursor.as_ref() => {
                    return Err(Error::RemoteUnavailable(format!(
                        "{} returned the same cursor twice",
                        self.provider.name()
                    )));
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(
            provider = self.provider.name(),
            pages,
            files = records.len(),
            "remote listing complete"
        );
        Ok(records)
    }

    /// Fetch a file's bytes; `None` when the provider cannot locate it.
    pub async fn get_content(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.provider.get_content(path).await
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.excludes.is_match(path.trim_start_matches('/'))
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<crate::traits::ListPage> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match self.provider.list_page(cursor).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        provider = self.provider.name(),
                        attempt = attempt + 1,
                        error = %e,
                        "listing page failed"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::RemoteUnavailable(format!(
            "listing {} failed after {} attempts: {}",
            self.provider.name(),
            self.max_retries + 1,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("invalid exclude glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid exclude globs: {e}")))
}
