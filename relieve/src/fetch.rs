//! Byte sources for index documents and tile archives.
//!
//! Everything the pipeline reads goes through the [`Fetcher`] trait, keyed by
//! a path relative to the source's base locations. Three sources ship with
//! the crate:
//!
//! - [`HttpFetcher`]: one or more base URLs tried in order, with a request
//!   timeout and bounded retries (requires the `http` feature).
//! - [`FileFetcher`]: one or more local root directories tried in order.
//! - [`MemoryFetcher`]: an in-memory bundle set, handy for embedding data and
//!   for tests; it counts fetches per path.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, TerrainError};

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of retries per base URL.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// A source of raw bytes addressed by relative path.
#[async_trait]
pub trait Fetcher: Send + Sync + Debug {
    /// Fetch the complete payload at `path`.
    ///
    /// Implementations try each of their base locations in order and only
    /// fail once all of them have failed.
    async fn fetch(&self, path: &str) -> Result<Bytes>;

    /// Human-readable description of the base locations, for logs.
    fn describe(&self) -> String;
}

/// Reject absolute paths and parent-directory components.
fn validate_relative(path: &str) -> Result<()> {
    let escapes = Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(TerrainError::FetchFailed {
            path: path.to_string(),
            reason: "path must be relative and stay below the base location".to_string(),
        });
    }
    Ok(())
}

/// Fetches payloads from one or more HTTP base URLs.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    bases: Vec<reqwest::Url>,
    max_retries: u32,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    /// Create a fetcher over the given base URLs with default timeout and retries.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::Config`] if no base is given or a base is not
    /// an `http`/`https` URL.
    pub fn new<I, S>(bases: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_options(bases, DEFAULT_TIMEOUT_SECS, DEFAULT_MAX_RETRIES)
    }

    /// Create a fetcher with an explicit timeout and retry count.
    pub fn with_options<I, S>(bases: I, timeout_secs: u64, max_retries: u32) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let bases = bases
            .into_iter()
            .map(|base| parse_base_url(base.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        if bases.is_empty() {
            return Err(TerrainError::Config(
                "at least one base URL is required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            bases,
            max_retries,
        })
    }

    /// The configured base URLs.
    pub fn bases(&self) -> &[reqwest::Url] {
        &self.bases
    }

    /// Build the full URL for `path` under `base`.
    fn build_url(base: &reqwest::Url, path: &str) -> Result<reqwest::Url> {
        base.join(path.trim_start_matches('/'))
            .map_err(|e| TerrainError::FetchFailed {
                path: path.to_string(),
                reason: format!("invalid URL: {}", e),
            })
    }

    /// One GET against one URL.
    async fn get_once(&self, url: &reqwest::Url) -> std::result::Result<Bytes, (bool, String)> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| (true, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // A missing file will not appear on retry
            let retryable = status != reqwest::StatusCode::NOT_FOUND;
            return Err((retryable, format!("HTTP {}", status)));
        }

        response.bytes().await.map_err(|e| (true, e.to_string()))
    }
}

/// Parse a base URL, forcing a trailing slash so `join` appends rather than replaces.
#[cfg(feature = "http")]
fn parse_base_url(base: &str) -> Result<reqwest::Url> {
    let normalized = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    };

    let url = reqwest::Url::parse(&normalized)
        .map_err(|e| TerrainError::Config(format!("invalid base URL {}: {}", base, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(TerrainError::Config(format!(
            "base URL {} has unsupported scheme {}",
            base, scheme
        ))),
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, path: &str) -> Result<Bytes> {
        validate_relative(path)?;

        let mut failures = Vec::new();
        for base in &self.bases {
            let url = Self::build_url(base, path)?;

            for attempt in 0..=self.max_retries {
                if attempt > 0 {
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }

                match self.get_once(&url).await {
                    Ok(bytes) => {
                        tracing::debug!(%url, bytes = bytes.len(), "Fetched");
                        return Ok(bytes);
                    }
                    Err((retryable, reason)) => {
                        tracing::debug!(%url, attempt, %reason, "Fetch attempt failed");
                        if !retryable || attempt == self.max_retries {
                            failures.push(format!("{}: {}", url, reason));
                            break;
                        }
                    }
                }
            }
        }

        Err(TerrainError::FetchFailed {
            path: path.to_string(),
            reason: failures.join("; "),
        })
    }

    fn describe(&self) -> String {
        self.bases
            .iter()
            .map(|u| u.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Reads payloads from one or more local directories.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    roots: Vec<PathBuf>,
}

impl FileFetcher {
    /// Create a fetcher over the given root directories, tried in order.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::Config`] if no root is given.
    pub fn new<I, P>(roots: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots: Vec<PathBuf> = roots
            .into_iter()
            .map(|root| root.as_ref().to_path_buf())
            .collect();

        if roots.is_empty() {
            return Err(TerrainError::Config(
                "at least one data directory is required".to_string(),
            ));
        }

        Ok(Self { roots })
    }

    /// The configured root directories.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, path: &str) -> Result<Bytes> {
        validate_relative(path)?;

        let mut failures = Vec::new();
        for root in &self.roots {
            let full = root.join(path);
            match tokio::fs::read(&full).await {
                Ok(data) => return Ok(Bytes::from(data)),
                Err(e) => failures.push(format!("{}: {}", full.display(), e)),
            }
        }

        Err(TerrainError::FetchFailed {
            path: path.to_string(),
            reason: failures.join("; "),
        })
    }

    fn describe(&self) -> String {
        self.roots
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Serves payloads from memory.
///
/// Counts how often each path was requested, and can simulate network
/// latency so concurrent callers actually overlap.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    files: RwLock<HashMap<String, Bytes>>,
    fetches: RwLock<HashMap<String, Arc<AtomicU64>>>,
    latency: Option<Duration>,
}

impl MemoryFetcher {
    /// Create an empty fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Add or replace the payload at `path`.
    pub fn insert(&self, path: impl Into<String>, data: impl Into<Bytes>) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path.into(), data.into());
    }

    /// Builder-style [`MemoryFetcher::insert`].
    pub fn with_file(self, path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(path, data);
        self
    }

    /// Number of fetches requested for `path`, successful or not.
    pub fn fetch_count(&self, path: &str) -> u64 {
        let fetches = self.fetches.read().unwrap_or_else(|e| e.into_inner());
        fetches
            .get(path)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn counter(&self, path: &str) -> Arc<AtomicU64> {
        let mut fetches = self.fetches.write().unwrap_or_else(|e| e.into_inner());
        fetches.entry(path.to_string()).or_default().clone()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, path: &str) -> Result<Bytes> {
        self.counter(path).fetch_add(1, Ordering::Relaxed);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(path)
            .cloned()
            .ok_or_else(|| TerrainError::FetchFailed {
                path: path.to_string(),
                reason: "not found".to_string(),
            })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Tries several sources in order, e.g. a local mirror before a remote server.
#[derive(Debug)]
pub struct FallbackFetcher {
    sources: Vec<Arc<dyn Fetcher>>,
}

impl FallbackFetcher {
    /// Create a fetcher over `sources`, tried first to last.
    pub fn new(sources: Vec<Arc<dyn Fetcher>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Fetcher for FallbackFetcher {
    async fn fetch(&self, path: &str) -> Result<Bytes> {
        let mut failures = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            match source.fetch(path).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => failures.push(e.to_string()),
            }
        }
        Err(TerrainError::FetchFailed {
            path: path.to_string(),
            reason: failures.join("; "),
        })
    }

    fn describe(&self) -> String {
        self.sources
            .iter()
            .map(|s| s.describe())
            .collect::<Vec<_>>()
            .join(", then ")
    }
}
