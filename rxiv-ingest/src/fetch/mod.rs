//! Manifest-driven download of the arXiv bulk data
//!
//! A pull fetches the collection's manifest, then every archive it lists,
//! into `<DATA_PATH>/arxiv/<key>`. Files already on disk are never fetched
//! again, missing objects are logged and skipped, and transient failures are
//! retried with exponential backoff.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rxiv_records::Manifest;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub mod http_store;

pub use http_store::HttpObjectStore;

/// A bulk data collection of the bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    /// LaTeX source archives
    Source,
    /// PDF archives
    Pdf,
}

impl Collection {
    /// Object key of the collection manifest
    pub fn manifest_key(&self) -> &'static str {
        match self {
            Self::Source => "src/arXiv_src_manifest.xml",
            Self::Pdf => "pdf/arXiv_pdf_manifest.xml",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Object {key} not found")]
    NotFound { key: String },

    /// Worth retrying: connection failures, 5xx and 429 responses
    #[error("Transient failure fetching {key}: {reason}")]
    Transient { key: String, reason: String },

    #[error("Failed to fetch {key}: {reason}")]
    Fatal { key: String, reason: String },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Manifest(#[from] rxiv_records::RecordsError),
}

impl FetchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Read access to a bucket of objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write the object at `key` to `dest`, returning the number of bytes written.
    async fn get(&self, key: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// What happened to one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded,
    AlreadyPresent,
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub downloaded: usize,
    pub already_present: usize,
    pub missing: usize,
    /// Keys that could not be fetched, with their causes
    pub failed: Vec<(String, String)>,
}

impl FetchSummary {
    fn record(&mut self, key: String, result: Result<FetchOutcome, FetchError>) {
        match result {
            Ok(FetchOutcome::Downloaded) => self.downloaded += 1,
            Ok(FetchOutcome::AlreadyPresent) => self.already_present += 1,
            Ok(FetchOutcome::Missing) => self.missing += 1,
            Err(e) => {
                tracing::error!("Giving up on {}: {}", key, e);
                self.failed.push((key, e.to_string()));
            }
        }
    }
}

/// Downloads objects under a local root with retries and bounded parallelism.
pub struct Fetcher {
    store: Arc<dyn ObjectStore>,
    root: PathBuf,
    retries: u32,
    base_delay: Duration,
    concurrency: usize,
}

impl Fetcher {
    pub fn new(store: Arc<dyn ObjectStore>, root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            root: root.into(),
            retries: 3,
            base_delay: Duration::from_millis(500),
            concurrency: 8,
        }
    }

    /// Retries after the first attempt for transient failures
    pub fn with_retries(self, retries: u32) -> Self {
        Self { retries, ..self }
    }

    /// Delay before the first retry; doubled for each further one
    pub fn with_base_delay(self, base_delay: Duration) -> Self {
        Self { base_delay, ..self }
    }

    pub fn with_concurrency(self, concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ..self
        }
    }

    /// Local path of `key`
    pub fn local_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Download `key` unless it is already present; returns whether a download
    /// happened. A missing object is logged and reported as `false`.
    pub async fn fetch(&self, key: &str) -> Result<bool, FetchError> {
        Ok(self.fetch_outcome(key).await? == FetchOutcome::Downloaded)
    }

    pub async fn fetch_outcome(&self, key: &str) -> Result<FetchOutcome, FetchError> {
        let local = self.local_path(key);
        if local.exists() {
            tracing::debug!("{} already present, skipping", key);
            return Ok(FetchOutcome::AlreadyPresent);
        }
        self.download(key, &local).await
    }

    /// Download `key` even if a local copy exists.
    pub async fn refresh(&self, key: &str) -> Result<FetchOutcome, FetchError> {
        let local = self.local_path(key);
        self.download(key, &local).await
    }

    async fn download(&self, key: &str, local: &Path) -> Result<FetchOutcome, FetchError> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::io(parent, e))?;
        }
        let partial = partial_path(local);

        let mut attempt = 0;
        loop {
            match self.store.get(key, &partial).await {
                Ok(bytes) => {
                    tokio::fs::rename(&partial, local)
                        .await
                        .map_err(|e| FetchError::io(local, e))?;
                    tracing::info!("Downloaded {} ({} bytes)", key, bytes);
                    return Ok(FetchOutcome::Downloaded);
                }
                Err(FetchError::NotFound { .. }) => {
                    discard(&partial).await;
                    tracing::warn!("{} not found in the object store, skipping", key);
                    return Ok(FetchOutcome::Missing);
                }
                Err(e) if e.is_transient() && attempt < self.retries => {
                    let delay = self.base_delay * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "{} (attempt {}/{}), retrying in {:?}",
                        e,
                        attempt,
                        self.retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    discard(&partial).await;
                    return Err(e);
                }
            }
        }
    }

    /// Fetch every key, at most `concurrency` at a time.
    pub async fn fetch_all(&self, keys: Vec<String>) -> FetchSummary {
        let results: Vec<_> = stream::iter(keys)
            .map(|key| async move {
                let result = self.fetch_outcome(&key).await;
                (key, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = FetchSummary::default();
        for (key, result) in results {
            summary.record(key, result);
        }
        summary
    }

    /// Download the current manifest of `collection` and every file it lists.
    pub async fn pull(&self, collection: Collection) -> Result<FetchSummary, FetchError> {
        let manifest_key = collection.manifest_key();
        tracing::info!("Fetching manifest {}", manifest_key);
        if self.refresh(manifest_key).await? == FetchOutcome::Missing {
            return Err(FetchError::NotFound {
                key: manifest_key.to_string(),
            });
        }

        let manifest = Manifest::from_path(self.local_path(manifest_key))?;
        let keys = manifest.filenames();
        tracing::info!("Manifest lists {} files", keys.len());

        let summary = self.fetch_all(keys).await;
        tracing::info!(
            "Pull finished: {} downloaded, {} already present, {} missing, {} failed",
            summary.downloaded,
            summary.already_present,
            summary.missing,
            summary.failed.len()
        );
        Ok(summary)
    }
}

/// `file.tar` -> `file.tar.part`
fn partial_path(local: &Path) -> PathBuf {
    let mut name = local.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

async fn discard(partial: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!("Could not remove {}: {}", partial.display(), e);
        }
    }
}
