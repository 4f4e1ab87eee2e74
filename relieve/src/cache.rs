//! Bounded caches for fetched archives and decoded rasters.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use moka::future::Cache;
use serde::Serialize;

use crate::archive;
use crate::error::{Result, TerrainError};
use crate::fetch::Fetcher;
use crate::raster::RasterTile;

/// Default number of archives kept in memory.
pub const DEFAULT_ARCHIVE_CACHE_SIZE: u64 = 32;

/// Default number of decoded rasters kept in memory.
pub const DEFAULT_RASTER_CACHE_SIZE: u64 = 8;

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Archives currently cached.
    pub archive_entries: u64,
    /// Archive requests served, cached or not.
    pub archive_requests: u64,
    /// Archive requests that had to fetch and decompress.
    pub archive_fetches: u64,
    /// Decoded rasters currently cached.
    pub raster_entries: u64,
    /// Region sub-indexes loaded so far.
    pub regions_loaded: u64,
}

impl CacheStats {
    /// Share of archive requests served from memory (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        if self.archive_requests == 0 {
            0.0
        } else {
            let hits = self.archive_requests.saturating_sub(self.archive_fetches);
            hits as f64 / self.archive_requests as f64
        }
    }
}

/// How a fetched payload is turned into cacheable bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// A gzip-wrapped container, with the uncompressed fallback.
    Archive,
    /// A standalone raster, gunzipped only if it carries the gzip magic.
    Raster,
}

/// Keyed store of fetched and decompressed payloads.
///
/// Entries are keyed by payload path only and hold the complete decompressed
/// bytes; a failed fetch or decompression inserts nothing. Concurrent
/// requests for a missing key share one load.
#[derive(Debug)]
pub struct ArchiveCache {
    entries: Cache<String, Bytes>,
    requests: AtomicU64,
    fetches: AtomicU64,
}

impl ArchiveCache {
    /// Create a cache holding up to `capacity` payloads.
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
            requests: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    /// Maximum number of cached payloads.
    pub fn capacity(&self) -> u64 {
        self.entries.policy().max_capacity().unwrap_or(0)
    }

    /// Return the decompressed payload at `path`, loading it on a miss.
    ///
    /// # Errors
    ///
    /// Propagates fetch and decompression failures. Errors from a load shared
    /// with other callers arrive wrapped in [`TerrainError::Shared`].
    pub async fn load(&self, fetcher: &dyn Fetcher, path: &str, kind: PayloadKind) -> Result<Bytes> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        self.entries
            .try_get_with(path.to_string(), async {
                self.fetches.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(path, ?kind, "Archive cache miss");

                let raw = fetcher.fetch(path).await?;
                let owned = path.to_string();
                let data = tokio::task::spawn_blocking(move || match kind {
                    PayloadKind::Archive => archive::decompress_archive(&owned, raw),
                    PayloadKind::Raster => archive::decompress_payload(&owned, raw),
                })
                .await??;
                Ok::<_, TerrainError>(data)
            })
            .await
            .map_err(TerrainError::from_shared)
    }

    /// Extract one member of the archive at `archive_path`.
    ///
    /// Returns `Ok(None)` when the archive has no such member.
    pub async fn extract_member(
        &self,
        fetcher: &dyn Fetcher,
        archive_path: &str,
        member: &str,
    ) -> Result<Option<Bytes>> {
        let data = self.load(fetcher, archive_path, PayloadKind::Archive).await?;
        archive::extract_member(&data, member)
    }

    /// Whether `path` is currently cached.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of cached payloads, after applying pending evictions.
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    /// Total requests served.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Requests that had to fetch.
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Drop every cached payload and reset the counters.
    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.requests.store(0, Ordering::Relaxed);
        self.fetches.store(0, Ordering::Relaxed);
    }
}

/// Bounded cache of decoded rasters.
///
/// A capacity of zero disables caching: every lookup decodes afresh.
#[derive(Debug)]
pub struct RasterCache {
    tiles: Option<Cache<String, Arc<RasterTile>>>,
}

impl RasterCache {
    /// Create a cache holding up to `capacity` rasters.
    pub fn new(capacity: u64) -> Self {
        let tiles = (capacity > 0).then(|| Cache::builder().max_capacity(capacity).build());
        Self { tiles }
    }

    /// Whether decoded rasters are kept at all.
    pub fn is_enabled(&self) -> bool {
        self.tiles.is_some()
    }

    /// Return the raster cached under `key`, running `decode` on a miss.
    pub async fn get_or_decode<F>(&self, key: &str, decode: F) -> Result<Arc<RasterTile>>
    where
        F: Future<Output = Result<Arc<RasterTile>>>,
    {
        match &self.tiles {
            Some(tiles) => tiles
                .try_get_with(key.to_string(), decode)
                .await
                .map_err(TerrainError::from_shared),
            None => decode.await,
        }
    }

    /// Number of cached rasters.
    pub async fn entry_count(&self) -> u64 {
        match &self.tiles {
            Some(tiles) => {
                tiles.run_pending_tasks().await;
                tiles.entry_count()
            }
            None => 0,
        }
    }

    /// Drop every cached raster.
    pub fn clear(&self) {
        if let Some(tiles) = &self.tiles {
            tiles.invalidate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::time::Duration;

    fn container(name: &str, data: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, data).unwrap();
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            archive_requests: 10,
            archive_fetches: 2,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.8);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_extract_through_cache() {
        let fetcher = MemoryFetcher::new()
            .with_file("centro_01.tar", gzip(&container("tile_1.tif", b"raster")));
        let cache = ArchiveCache::new(4);

        let member = cache
            .extract_member(&fetcher, "centro_01.tar", "tile_1.tif")
            .await
            .unwrap();
        assert_eq!(member.as_deref(), Some(&b"raster"[..]));

        let missing = cache
            .extract_member(&fetcher, "centro_01.tar", "tile_9.tif")
            .await
            .unwrap();
        assert!(missing.is_none());

        assert!(cache.contains("centro_01.tar"));
        assert_eq!(cache.requests(), 2);
        assert_eq!(cache.fetches(), 1);
        assert_eq!(fetcher.fetch_count("centro_01.tar"), 1);
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_extract_from_uncompressed_container_without_checksum() {
        // Name, octal size and padded data only
        let mut data = vec![0u8; archive::BLOCK_SIZE];
        data[..10].copy_from_slice(b"tile_1.tif");
        data[124..136].copy_from_slice(b"00000000014 ");
        data.extend_from_slice(b"raster bytes");
        data.resize(4 * archive::BLOCK_SIZE, 0);

        let fetcher = MemoryFetcher::new().with_file("centro_01.tar", data);
        let cache = ArchiveCache::new(4);

        let member = cache
            .extract_member(&fetcher, "centro_01.tar", "tile_1.tif")
            .await
            .unwrap();
        assert_eq!(member.as_deref(), Some(&b"raster bytes"[..]));
        assert!(cache.contains("centro_01.tar"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_share_one_fetch() {
        let fetcher = MemoryFetcher::new()
            .with_latency(Duration::from_millis(50))
            .with_file("centro_01.tar", gzip(&container("tile_1.tif", b"raster")));
        let cache = ArchiveCache::new(4);

        let (a, b) = tokio::join!(
            cache.load(&fetcher, "centro_01.tar", PayloadKind::Archive),
            cache.load(&fetcher, "centro_01.tar", PayloadKind::Archive),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a, b);
        assert_eq!(fetcher.fetch_count("centro_01.tar"), 1);
        assert_eq!(cache.fetches(), 1);
        assert_eq!(cache.requests(), 2);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let fetcher = MemoryFetcher::new().with_file("broken.tar", b"not an archive".to_vec());
        let cache = ArchiveCache::new(4);

        let err = cache
            .load(&fetcher, "broken.tar", PayloadKind::Archive)
            .await
            .unwrap_err();
        assert!(err.is_hard());
        assert!(!cache.contains("broken.tar"));

        let err = cache
            .load(&fetcher, "missing.tar", PayloadKind::Archive)
            .await
            .unwrap_err();
        assert!(matches!(err.root(), TerrainError::FetchFailed { .. }));

        // A retry fetches again
        let _ = cache.load(&fetcher, "broken.tar", PayloadKind::Archive).await;
        assert_eq!(fetcher.fetch_count("broken.tar"), 2);
    }

    #[tokio::test]
    async fn test_raw_payload_passthrough() {
        let fetcher = MemoryFetcher::new()
            .with_file("tile.tif", b"II*\0raw".to_vec())
            .with_file("tile.tif.gz", gzip(b"II*\0raw"));
        let cache = ArchiveCache::new(4);

        let raw = cache.load(&fetcher, "tile.tif", PayloadKind::Raster).await.unwrap();
        let unzipped = cache
            .load(&fetcher, "tile.tif.gz", PayloadKind::Raster)
            .await
            .unwrap();
        assert_eq!(raw, unzipped);
    }

    #[tokio::test]
    async fn test_raster_cache_disabled() {
        let cache = RasterCache::new(0);
        assert!(!cache.is_enabled());

        let tile = Arc::new(RasterTile {
            data: vec![1.0],
            width: 1,
            height: 1,
            origin_x: 0.0,
            origin_y: 0.0,
            pixel_scale_x: 1.0,
            pixel_scale_y: 1.0,
            no_data: None,
        });

        let decoded = AtomicU64::new(0);
        for _ in 0..3 {
            cache
                .get_or_decode("a", async {
                    decoded.fetch_add(1, Ordering::Relaxed);
                    Ok(tile.clone())
                })
                .await
                .unwrap();
        }
        assert_eq!(decoded.load(Ordering::Relaxed), 3);
        assert_eq!(cache.entry_count().await, 0);

        let cache = RasterCache::new(2);
        decoded.store(0, Ordering::Relaxed);
        for _ in 0..3 {
            cache
                .get_or_decode("a", async {
                    decoded.fetch_add(1, Ordering::Relaxed);
                    Ok(tile.clone())
                })
                .await
                .unwrap();
        }
        assert_eq!(decoded.load(Ordering::Relaxed), 1);
        assert_eq!(cache.entry_count().await, 1);
    }
}
