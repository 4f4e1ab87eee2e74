//! The elevation pipeline: index resolution, archive caching, raster
//! decoding and sampling behind one handle.
//!
//! ```ignore
//! use relieve::ElevationPipelineBuilder;
//!
//! let pipeline = ElevationPipelineBuilder::new()
//!     .base_url("https://tiles.example.com/dem")
//!     .archive_cache_size(64)
//!     .build()?;
//!
//! let elevation = pipeline.elevation_at(-34.6, -58.4).await?;
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::bounds::{Bounds, LatLng};
use crate::cache::{
    ArchiveCache, CacheStats, PayloadKind, RasterCache, DEFAULT_ARCHIVE_CACHE_SIZE,
    DEFAULT_RASTER_CACHE_SIZE,
};
use crate::cancel::CancelToken;
use crate::error::{Result, TerrainError};
#[cfg(feature = "http")]
use crate::fetch::HttpFetcher;
use crate::fetch::{FallbackFetcher, Fetcher, FileFetcher, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS};
use crate::index::IndexEntry;
use crate::profile::{ProfileBuilder, ProfilePoint};
use crate::raster::RasterTile;
use crate::region::{default_bands, RegionBand};
use crate::resolver::{
    TileIndexResolver, DEFAULT_CONCURRENCY, DEFAULT_INDEX_PATHS, DEFAULT_MAX_REGION_PROBES,
    DEFAULT_REGION_CACHE_SIZE,
};
use crate::sampler::{AnomalyPolicy, ElevationSampler};

/// Upper bound for batch fan-out.
pub const MAX_CONCURRENCY: usize = 16;

/// Statistics from a preload operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PreloadStats {
    /// Index entries intersecting the requested areas.
    pub tiles_matched: u64,
    /// Archives fetched and cached by this preload.
    pub archives_loaded: u64,
    /// Archives that were already cached.
    pub archives_already_cached: u64,
    /// Archives that failed to load.
    pub archives_failed: u64,
    /// Total elapsed time in milliseconds.
    pub elapsed_ms: u64,
}

/// Elevation queries over a tiled, archived raster dataset.
///
/// Owns its index, caches and fetcher; independent pipelines share nothing.
/// All operations take `&self` and may be called concurrently.
#[derive(Debug)]
pub struct ElevationPipeline {
    fetcher: Arc<dyn Fetcher>,
    resolver: TileIndexResolver,
    archives: ArchiveCache,
    rasters: RasterCache,
    sampler: ElevationSampler,
    concurrency: usize,
}

impl ElevationPipeline {
    /// Elevation at a point, in meters.
    ///
    /// Returns `Ok(None)` when no tile covers the point or no trustworthy
    /// value is available there.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::InvalidCoordinates`] for out-of-range input,
    /// and the hard failures of [`TerrainError::is_hard`].
    pub async fn elevation_at(&self, lat: f64, lng: f64) -> Result<Option<f64>> {
        self.elevation_at_with_cancel(lat, lng, &CancelToken::new())
            .await
    }

    /// [`ElevationPipeline::elevation_at`] that stops when `token` is cancelled.
    pub async fn elevation_at_with_cancel(
        &self,
        lat: f64,
        lng: f64,
        token: &CancelToken,
    ) -> Result<Option<f64>> {
        self.query(Bounds::point(lat, lng), LatLng::new(lat, lng), token)
            .await
    }

    /// Elevation at the center of `bounds`, taken from the tile that contains
    /// the whole box.
    pub async fn elevation_for_bounds(&self, bounds: &Bounds) -> Result<Option<f64>> {
        self.query(*bounds, bounds.centroid(), &CancelToken::new())
            .await
    }

    /// Elevations for many points, in input order.
    ///
    /// Lookups run concurrently up to the configured fan-out.
    pub async fn elevations(&self, points: &[LatLng]) -> Result<Vec<Option<f64>>> {
        self.elevations_with_cancel(points, &CancelToken::new())
            .await
    }

    /// [`ElevationPipeline::elevations`] that stops when `token` is cancelled.
    pub async fn elevations_with_cancel(
        &self,
        points: &[LatLng],
        token: &CancelToken,
    ) -> Result<Vec<Option<f64>>> {
        validate_points(points)?;

        let mut results: Vec<(usize, Result<Option<f64>>)> = stream::iter(points.iter().enumerate())
            .map(|(i, point)| async move {
                let result = self
                    .query(Bounds::point(point.lat, point.lng), *point, token)
                    .await;
                (i, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);

        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Elevation profile along an ordered route.
    ///
    /// Each point carries its distance from the start and the slope of the
    /// segment leading to it. Repeated coordinates are looked up once.
    pub async fn build_profile(&self, points: &[LatLng]) -> Result<Vec<ProfilePoint>> {
        self.build_profile_with_cancel(points, &CancelToken::new())
            .await
    }

    /// [`ElevationPipeline::build_profile`] that stops when `token` is cancelled.
    ///
    /// The token is checked before every point.
    pub async fn build_profile_with_cancel(
        &self,
        points: &[LatLng],
        token: &CancelToken,
    ) -> Result<Vec<ProfilePoint>> {
        validate_points(points)?;

        let mut builder = ProfileBuilder::with_capacity(points.len());
        for point in points {
            token.check()?;
            let elevation = match builder.memoized(*point) {
                Some(elevation) => elevation,
                None => {
                    self.query(Bounds::point(point.lat, point.lng), *point, token)
                        .await?
                }
            };
            builder.push(*point, elevation);
        }

        tracing::debug!(points = builder.len(), "Built profile");
        Ok(builder.finish())
    }

    /// The index entry covering `bounds`, if any.
    pub async fn resolve_tile(&self, bounds: &Bounds) -> Result<Option<IndexEntry>> {
        if !bounds.is_valid() {
            let center = bounds.centroid();
            return Err(TerrainError::InvalidCoordinates {
                lat: center.lat,
                lng: center.lng,
            });
        }
        self.resolver.resolve_tile(bounds).await
    }

    /// Fetch and cache the archives of every tile intersecting `areas`.
    ///
    /// With `None`, every tile in the index is preloaded. Archives that fail
    /// to load are counted and logged, not reported as errors.
    pub async fn preload(&self, areas: Option<&[Bounds]>) -> Result<PreloadStats> {
        let start = Instant::now();
        let mut stats = PreloadStats::default();

        let world = [Bounds::new(90.0, -90.0, 180.0, -180.0)];
        let areas = areas.unwrap_or(&world);

        let mut seen_tiles = HashSet::new();
        let mut seen_payloads = HashSet::new();
        let mut pending = Vec::new();

        for area in areas {
            for entry in self.resolver.entries_in(area).await? {
                if !seen_tiles.insert((entry.region.clone(), entry.id.clone())) {
                    continue;
                }
                stats.tiles_matched += 1;

                let path = entry.payload_path().to_string();
                if !seen_payloads.insert(path.clone()) {
                    continue;
                }
                if self.archives.contains(&path) {
                    stats.archives_already_cached += 1;
                } else {
                    pending.push((path, payload_kind(&entry)));
                }
            }
        }

        let outcomes: Vec<bool> = stream::iter(pending)
            .map(|(path, kind)| async move {
                match self.archives.load(self.fetcher.as_ref(), &path, kind).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "Preload failed");
                        false
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for loaded in outcomes {
            if loaded {
                stats.archives_loaded += 1;
            } else {
                stats.archives_failed += 1;
            }
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            matched = stats.tiles_matched,
            loaded = stats.archives_loaded,
            cached = stats.archives_already_cached,
            failed = stats.archives_failed,
            elapsed_ms = stats.elapsed_ms,
            "Preload finished"
        );
        Ok(stats)
    }

    /// Current cache statistics.
    pub async fn cache_stats(&self) -> CacheStats {
        CacheStats {
            archive_entries: self.archives.entry_count().await,
            archive_requests: self.archives.requests(),
            archive_fetches: self.archives.fetches(),
            raster_entries: self.rasters.entry_count().await,
            regions_loaded: self.resolver.regions_loaded(),
        }
    }

    /// Drop cached archives, rasters and region sub-indexes.
    ///
    /// The global index stays loaded.
    pub fn clear_cache(&self) {
        self.archives.clear();
        self.rasters.clear();
        self.resolver.clear();
    }

    /// The tile index resolver.
    pub fn resolver(&self) -> &TileIndexResolver {
        &self.resolver
    }

    /// The byte source.
    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// The sampler and its anomaly thresholds.
    pub fn sampler(&self) -> &ElevationSampler {
        &self.sampler
    }

    /// Batch fan-out.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Resolve, load and sample. Soft failures become `Ok(None)`.
    async fn query(&self, bounds: Bounds, point: LatLng, token: &CancelToken) -> Result<Option<f64>> {
        if !point.is_valid() || !bounds.is_valid() {
            return Err(TerrainError::InvalidCoordinates {
                lat: point.lat,
                lng: point.lng,
            });
        }

        let Some(entry) = token.run(self.resolver.resolve_tile(&bounds)).await? else {
            tracing::debug!(lat = point.lat, lng = point.lng, "No tile covers point");
            return Ok(None);
        };

        match token.run(self.raster(&entry)).await {
            Ok(tile) => Ok(self.sampler.sample(&tile, point.lat, point.lng)),
            Err(e) if e.is_hard() => Err(e),
            Err(e) => {
                tracing::warn!(tile = %entry.id, error = %e, "Elevation unavailable");
                Ok(None)
            }
        }
    }

    /// The decoded raster of an index entry.
    async fn raster(&self, entry: &IndexEntry) -> Result<Arc<RasterTile>> {
        let key = format!("{}#{}", entry.payload_path(), entry.filename);

        self.rasters
            .get_or_decode(&key, async {
                let fetcher = self.fetcher.as_ref();
                let payload = match &entry.archive_file {
                    Some(archive) => self
                        .archives
                        .extract_member(fetcher, archive, &entry.filename)
                        .await?
                        .ok_or_else(|| TerrainError::MemberNotFound {
                            archive: archive.clone(),
                            member: entry.filename.clone(),
                        })?,
                    None => {
                        self.archives
                            .load(fetcher, &entry.filename, PayloadKind::Raster)
                            .await?
                    }
                };

                let tile = tokio::task::spawn_blocking(move || RasterTile::decode(&payload)).await??;
                tracing::debug!(tile = %entry.id, width = tile.width, height = tile.height, "Decoded raster");
                Ok::<_, TerrainError>(Arc::new(tile))
            })
            .await
    }
}

fn payload_kind(entry: &IndexEntry) -> PayloadKind {
    if entry.archive_file.is_some() {
        PayloadKind::Archive
    } else {
        PayloadKind::Raster
    }
}

fn validate_points(points: &[LatLng]) -> Result<()> {
    match points.iter().find(|p| !p.is_valid()) {
        Some(p) => Err(TerrainError::InvalidCoordinates {
            lat: p.lat,
            lng: p.lng,
        }),
        None => Ok(()),
    }
}

/// Builder for [`ElevationPipeline`].
///
/// At least one data source is required: base URLs, data directories, or an
/// explicit [`Fetcher`]. When both directories and URLs are given, the
/// directories are tried first.
///
/// # Example
///
/// ```ignore
/// use relieve::ElevationPipelineBuilder;
///
/// let pipeline = ElevationPipelineBuilder::new()
///     .data_dir("/data/elevation")
///     .raster_cache_size(16)
///     .concurrency(8)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct ElevationPipelineBuilder {
    base_urls: Vec<String>,
    data_dirs: Vec<PathBuf>,
    fetcher: Option<Arc<dyn Fetcher>>,
    index_paths: Vec<String>,
    archive_cache_size: u64,
    raster_cache_size: u64,
    concurrency: usize,
    timeout_secs: u64,
    max_retries: u32,
    max_region_probes: usize,
    region_cache_size: u64,
    bands: Vec<RegionBand>,
    policy: AnomalyPolicy,
}

impl Default for ElevationPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ElevationPipelineBuilder {
    /// Create a builder with default settings and no data source.
    pub fn new() -> Self {
        Self {
            base_urls: Vec::new(),
            data_dirs: Vec::new(),
            fetcher: None,
            index_paths: DEFAULT_INDEX_PATHS.iter().map(|p| p.to_string()).collect(),
            archive_cache_size: DEFAULT_ARCHIVE_CACHE_SIZE,
            raster_cache_size: DEFAULT_RASTER_CACHE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_region_probes: DEFAULT_MAX_REGION_PROBES,
            region_cache_size: DEFAULT_REGION_CACHE_SIZE,
            bands: default_bands(),
            policy: AnomalyPolicy::default(),
        }
    }

    /// Create a builder from environment variables.
    ///
    /// | Variable | Meaning | Default |
    /// |----------|---------|---------|
    /// | `RELIEVE_BASE_URLS` | Comma-separated base URLs | - |
    /// | `RELIEVE_DATA_DIRS` | Comma-separated data directories | - |
    /// | `RELIEVE_INDEX_PATHS` | Comma-separated index candidates | `index.json,elevation/index.json` |
    /// | `RELIEVE_CACHE_SIZE` | Archive cache entries | 32 |
    /// | `RELIEVE_RASTER_CACHE_SIZE` | Decoded raster cache entries | 8 |
    /// | `RELIEVE_REGION_CACHE_SIZE` | Region sub-index cache entries | 64 |
    /// | `RELIEVE_CONCURRENCY` | Batch fan-out | 4 |
    /// | `RELIEVE_TIMEOUT_SECS` | HTTP timeout | 30 |
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::Config`] if neither `RELIEVE_BASE_URLS` nor
    /// `RELIEVE_DATA_DIRS` is set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ElevationPipelineBuilder::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let list = |key: &str| -> Vec<String> {
            lookup(key)
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut builder = Self::new();
        builder.base_urls = list("RELIEVE_BASE_URLS");
        builder.data_dirs = list("RELIEVE_DATA_DIRS")
            .into_iter()
            .map(PathBuf::from)
            .collect();

        if builder.base_urls.is_empty() && builder.data_dirs.is_empty() {
            return Err(TerrainError::Config(
                "set RELIEVE_BASE_URLS or RELIEVE_DATA_DIRS".to_string(),
            ));
        }

        let index_paths = list("RELIEVE_INDEX_PATHS");
        if !index_paths.is_empty() {
            builder.index_paths = index_paths;
        }

        if let Some(size) = lookup("RELIEVE_CACHE_SIZE").and_then(|s| s.parse().ok()) {
            builder.archive_cache_size = size;
        }
        if let Some(size) = lookup("RELIEVE_RASTER_CACHE_SIZE").and_then(|s| s.parse().ok()) {
            builder.raster_cache_size = size;
        }
        if let Some(size) = lookup("RELIEVE_REGION_CACHE_SIZE").and_then(|s| s.parse().ok()) {
            builder.region_cache_size = size;
        }
        if let Some(n) = lookup("RELIEVE_CONCURRENCY").and_then(|s| s.parse().ok()) {
            builder.concurrency = n;
        }
        if let Some(secs) = lookup("RELIEVE_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            builder.timeout_secs = secs;
        }

        Ok(builder)
    }

    /// Add an HTTP base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_urls.push(url.into());
        self
    }

    /// Add a local data directory.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dirs.push(dir.into());
        self
    }

    /// Use an explicit byte source instead of URLs or directories.
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replace the candidate index paths.
    pub fn index_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Set the maximum number of archives kept in memory.
    pub fn archive_cache_size(mut self, size: u64) -> Self {
        self.archive_cache_size = size;
        self
    }

    /// Set the maximum number of decoded rasters kept in memory (0 disables).
    pub fn raster_cache_size(mut self, size: u64) -> Self {
        self.raster_cache_size = size;
        self
    }

    /// Set the batch fan-out (1 to 16).
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the HTTP request timeout.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the HTTP retry count per base URL.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set how many regions a lookup may probe.
    pub fn max_region_probes(mut self, probes: usize) -> Self {
        self.max_region_probes = probes;
        self
    }

    /// Set the maximum number of region sub-indexes kept in memory.
    pub fn region_cache_size(mut self, size: u64) -> Self {
        self.region_cache_size = size;
        self
    }

    /// Replace the region band table.
    pub fn region_bands(mut self, bands: Vec<RegionBand>) -> Self {
        self.bands = bands;
        self
    }

    /// Set the anomaly thresholds.
    pub fn anomaly_policy(mut self, policy: AnomalyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::Config`] when no data source is configured,
    /// the concurrency is out of range, or a base URL is invalid.
    pub fn build(self) -> Result<ElevationPipeline> {
        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(TerrainError::Config(format!(
                "concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.concurrency
            )));
        }
        if self.index_paths.is_empty() {
            return Err(TerrainError::Config(
                "at least one index path is required".to_string(),
            ));
        }

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => {
                let mut sources: Vec<Arc<dyn Fetcher>> = Vec::new();
                if !self.data_dirs.is_empty() {
                    sources.push(Arc::new(FileFetcher::new(&self.data_dirs)?));
                }
                if !self.base_urls.is_empty() {
                    sources.push(http_fetcher(
                        &self.base_urls,
                        self.timeout_secs,
                        self.max_retries,
                    )?);
                }
                match sources.len() {
                    0 => {
                        return Err(TerrainError::Config(
                            "no data source: set a base URL or a data directory".to_string(),
                        ))
                    }
                    1 => sources.remove(0),
                    _ => Arc::new(FallbackFetcher::new(sources)),
                }
            }
        };

        tracing::debug!(source = %fetcher.describe(), "Building elevation pipeline");

        let resolver = TileIndexResolver::new(fetcher.clone())
            .with_index_paths(self.index_paths)
            .with_bands(self.bands)
            .with_max_region_probes(self.max_region_probes)
            .with_region_cache_size(self.region_cache_size)
            .with_concurrency(self.concurrency);

        Ok(ElevationPipeline {
            fetcher,
            resolver,
            archives: ArchiveCache::new(self.archive_cache_size),
            rasters: RasterCache::new(self.raster_cache_size),
            sampler: ElevationSampler::new(self.policy),
            concurrency: self.concurrency,
        })
    }
}

#[cfg(feature = "http")]
fn http_fetcher(urls: &[String], timeout_secs: u64, max_retries: u32) -> Result<Arc<dyn Fetcher>> {
    Ok(Arc::new(HttpFetcher::with_options(
        urls,
        timeout_secs,
        max_retries,
    )?))
}

#[cfg(not(feature = "http"))]
fn http_fetcher(_urls: &[String], _timeout_secs: u64, _max_retries: u32) -> Result<Arc<dyn Fetcher>> {
    Err(TerrainError::Config(
        "base URLs require the `http` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use crate::raster::fixtures::geotiff_f32;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;

    const INDEX: &str = r#"{"provincias": {
        "centro": {"index": "centro/index.json"},
        "cuyo": {"index": "cuyo/index.json"}
    }}"#;

    const CENTRO: &str = r#"{"tiles": {
        "tile_1": {"filename": "tile_1.tif", "archiveFile": "centro_01.tar",
                   "bounds": {"north": -34, "south": -35, "east": -58, "west": -59}},
        "tile_2": {"filename": "tile_2.tif", "archiveFile": "centro_01.tar",
                   "bounds": {"north": -33, "south": -34, "east": -58, "west": -59}},
        "tile_3": {"filename": "tile_3.tif", "archiveFile": "centro_02.tar",
                   "bounds": {"north": -35, "south": -36, "east": -58, "west": -59}},
        "tile_4": {"filename": "standalone/tile_4.tif.gz",
                   "bounds": {"north": -36, "south": -37, "east": -58, "west": -59}}
    }}"#;

    /// A 101×101 raster at 0.01° whose pixel (50, 50) sits on `center`.
    fn raster_around(center: (f64, f64), value: f32) -> Vec<u8> {
        let origin = (center.1 - 0.5, center.0 + 0.5);
        geotiff_f32(101, 101, &vec![value; 101 * 101], origin, 0.01, None)
    }

    fn tar(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_ustar();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// The "centro" dataset: tile_1 lives in centro_01.tar, tile_2 is listed
    /// but missing from the archive, tile_3's archive is corrupt and tile_4
    /// is a standalone gzipped raster.
    fn centro_fetcher() -> MemoryFetcher {
        let tile_1 = raster_around((-34.6, -58.4), 45.3);
        let tile_4 = raster_around((-36.5, -58.5), 812.0);

        MemoryFetcher::new()
            .with_file("index.json", INDEX)
            .with_file("centro/index.json", CENTRO)
            .with_file("centro_01.tar", gzip(&tar(&[("tile_1.tif", &tile_1[..])])))
            .with_file("centro_02.tar", b"\x1f\x8bcorrupt".to_vec())
            .with_file("standalone/tile_4.tif.gz", gzip(&tile_4))
    }

    fn pipeline(fetcher: Arc<MemoryFetcher>) -> ElevationPipeline {
        ElevationPipelineBuilder::new()
            .fetcher(fetcher)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_centro() {
        let fetcher = Arc::new(centro_fetcher());
        let pipeline = pipeline(fetcher.clone());

        assert_eq!(pipeline.elevation_at(-34.6, -58.4).await.unwrap(), Some(45.3));
        assert_eq!(fetcher.fetch_count("centro/index.json"), 1);
        assert_eq!(fetcher.fetch_count("cuyo/index.json"), 0);
    }

    #[tokio::test]
    async fn test_elevation_for_bounds() {
        let pipeline = pipeline(Arc::new(centro_fetcher()));

        let bounds = Bounds::new(-34.55, -34.65, -58.35, -58.45);
        assert_eq!(pipeline.elevation_for_bounds(&bounds).await.unwrap(), Some(45.3));

        // Spans two tiles: no single tile contains it
        let bounds = Bounds::new(-33.9, -34.1, -58.35, -58.45);
        assert_eq!(pipeline.elevation_for_bounds(&bounds).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_soft_failures_are_absent() {
        let pipeline = pipeline(Arc::new(centro_fetcher()));

        // Uncovered
        assert_eq!(pipeline.elevation_at(-10.0, -58.5).await.unwrap(), None);
        // Member missing from its archive
        assert_eq!(pipeline.elevation_at(-33.5, -58.5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_archive_fetch_failure_is_absent() {
        let fetcher = centro_fetcher()
            .with_file("centro/index.json", CENTRO.replace("centro_01", "centro_09"));
        let pipeline = pipeline(Arc::new(fetcher));

        assert_eq!(pipeline.elevation_at(-34.6, -58.4).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_decompression_failure_is_hard() {
        let pipeline = pipeline(Arc::new(centro_fetcher()));

        let err = pipeline.elevation_at(-35.5, -58.5).await.unwrap_err();
        assert!(matches!(err.root(), TerrainError::Decompression { .. }));
    }

    #[tokio::test]
    async fn test_standalone_payload() {
        let pipeline = pipeline(Arc::new(centro_fetcher()));
        assert_eq!(pipeline.elevation_at(-36.5, -58.5).await.unwrap(), Some(812.0));
    }

    #[tokio::test]
    async fn test_invalid_coordinates() {
        let pipeline = pipeline(Arc::new(centro_fetcher()));

        assert!(matches!(
            pipeline.elevation_at(95.0, 0.0).await,
            Err(TerrainError::InvalidCoordinates { .. })
        ));
        assert!(matches!(
            pipeline
                .build_profile(&[LatLng::new(0.0, 0.0), LatLng::new(0.0, 200.0)])
                .await,
            Err(TerrainError::InvalidCoordinates { .. })
        ));
    }

    #[tokio::test]
    async fn test_index_failure_is_hard() {
        let pipeline = pipeline(Arc::new(MemoryFetcher::new()));
        let err = pipeline.elevation_at(-34.6, -58.4).await.unwrap_err();
        assert!(matches!(err.root(), TerrainError::IndexLoad { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_fetch_archive_once() {
        let fetcher = Arc::new(centro_fetcher().with_latency(Duration::from_millis(30)));
        let pipeline = pipeline(fetcher.clone());

        let (a, b) = tokio::join!(
            pipeline.elevation_at(-34.6, -58.4),
            pipeline.elevation_at(-34.61, -58.41),
        );
        assert_eq!(a.unwrap(), Some(45.3));
        assert_eq!(b.unwrap(), Some(45.3));
        assert_eq!(fetcher.fetch_count("centro_01.tar"), 1);

        let stats = pipeline.cache_stats().await;
        assert_eq!(stats.archive_fetches, 1);
        assert_eq!(stats.raster_entries, 1);
        assert_eq!(stats.regions_loaded, 1);
    }

    #[tokio::test]
    async fn test_profile() {
        let fetcher = Arc::new(centro_fetcher());
        let pipeline = pipeline(fetcher.clone());

        let route = [
            LatLng::new(-34.6, -58.4),
            LatLng::new(-34.61, -58.41),
            LatLng::new(-34.6, -58.4),
            LatLng::new(-10.0, -58.4),
        ];
        let profile = pipeline.build_profile(&route).await.unwrap();

        assert_eq!(profile.len(), 4);
        assert_eq!(profile[0].distance_from_start, 0.0);
        assert_eq!(profile[0].elevation, Some(45.3));
        assert_eq!(profile[1].slope_percent, 0.0);
        assert_eq!(profile[3].elevation, None);
        assert_eq!(profile[3].slope_percent, 0.0);
        for pair in profile.windows(2) {
            assert!(pair[1].distance_from_start >= pair[0].distance_from_start);
        }

        // The second point hits the decoded raster; the third is memoized
        let stats = pipeline.cache_stats().await;
        assert_eq!(stats.archive_requests, 1);
    }

    #[tokio::test]
    async fn test_cancelled_profile() {
        let pipeline = pipeline(Arc::new(centro_fetcher()));
        let token = CancelToken::new();
        token.cancel();

        let result = pipeline
            .build_profile_with_cancel(&[LatLng::new(-34.6, -58.4)], &token)
            .await;
        assert!(matches!(result, Err(TerrainError::Cancelled)));
    }

    #[tokio::test]
    async fn test_batch_keeps_order() {
        let pipeline = ElevationPipelineBuilder::new()
            .fetcher(Arc::new(centro_fetcher()))
            .concurrency(3)
            .build()
            .unwrap();

        let points = [
            LatLng::new(-10.0, -58.4),
            LatLng::new(-34.6, -58.4),
            LatLng::new(-36.5, -58.5),
            LatLng::new(-33.5, -58.5),
        ];
        let elevations = pipeline.elevations(&points).await.unwrap();
        assert_eq!(elevations, vec![None, Some(45.3), Some(812.0), None]);
    }

    #[tokio::test]
    async fn test_preload() {
        let fetcher = Arc::new(centro_fetcher());
        let pipeline = pipeline(fetcher.clone());

        let area = [Bounds::new(-33.5, -35.5, -58.0, -59.0)];
        let stats = pipeline.preload(Some(&area)).await.unwrap();
        // tile_1, tile_2 and tile_3 intersect; two distinct archives, one corrupt
        assert_eq!(stats.tiles_matched, 3);
        assert_eq!(stats.archives_loaded, 1);
        assert_eq!(stats.archives_failed, 1);

        let stats = pipeline.preload(Some(&area)).await.unwrap();
        assert_eq!(stats.archives_already_cached, 1);
        assert_eq!(stats.archives_loaded, 0);

        pipeline.elevation_at(-34.6, -58.4).await.unwrap();
        assert_eq!(fetcher.fetch_count("centro_01.tar"), 1);

        pipeline.clear_cache();
        let stats = pipeline.cache_stats().await;
        assert_eq!(stats.archive_entries, 0);
        assert_eq!(stats.archive_requests, 0);
    }

    #[tokio::test]
    async fn test_raster_cache_disabled() {
        let pipeline = ElevationPipelineBuilder::new()
            .fetcher(Arc::new(centro_fetcher()))
            .raster_cache_size(0)
            .build()
            .unwrap();

        assert_eq!(pipeline.elevation_at(-34.6, -58.4).await.unwrap(), Some(45.3));
        assert_eq!(pipeline.elevation_at(-34.6, -58.4).await.unwrap(), Some(45.3));

        let stats = pipeline.cache_stats().await;
        assert_eq!(stats.raster_entries, 0);
        assert_eq!(stats.archive_fetches, 1);
        assert_eq!(stats.archive_requests, 2);
    }

    #[test]
    fn test_builder_validation() {
        assert!(matches!(
            ElevationPipelineBuilder::new().build(),
            Err(TerrainError::Config(_))
        ));
        assert!(matches!(
            ElevationPipelineBuilder::new()
                .data_dir("/data")
                .concurrency(0)
                .build(),
            Err(TerrainError::Config(_))
        ));
        assert!(matches!(
            ElevationPipelineBuilder::new()
                .data_dir("/data")
                .concurrency(17)
                .build(),
            Err(TerrainError::Config(_))
        ));
        assert!(ElevationPipelineBuilder::new()
            .data_dir("/data")
            .concurrency(16)
            .build()
            .is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("RELIEVE_DATA_DIRS", "/mnt/a, /mnt/b"),
            ("RELIEVE_INDEX_PATHS", "dem/index.json"),
            ("RELIEVE_CACHE_SIZE", "50"),
            ("RELIEVE_RASTER_CACHE_SIZE", "0"),
            ("RELIEVE_REGION_CACHE_SIZE", "128"),
            ("RELIEVE_CONCURRENCY", "not a number"),
        ]
        .into_iter()
        .collect();

        let builder =
            ElevationPipelineBuilder::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(
            builder.data_dirs,
            vec![PathBuf::from("/mnt/a"), PathBuf::from("/mnt/b")]
        );
        assert!(builder.base_urls.is_empty());
        assert_eq!(builder.index_paths, vec!["dem/index.json"]);
        assert_eq!(builder.archive_cache_size, 50);
        assert_eq!(builder.raster_cache_size, 0);
        assert_eq!(builder.region_cache_size, 128);
        assert_eq!(builder.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(builder.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_region_cache_size_reaches_resolver() {
        let pipeline = ElevationPipelineBuilder::new()
            .fetcher(Arc::new(MemoryFetcher::new()))
            .region_cache_size(200)
            .build()
            .unwrap();
        assert_eq!(pipeline.resolver().region_cache_size(), 200);
    }

    #[test]
    fn test_from_lookup_requires_source() {
        let result = ElevationPipelineBuilder::from_lookup(|_| None);
        assert!(matches!(result, Err(TerrainError::Config(_))));
    }

    #[test]
    fn test_from_env_with_values() {
        // Save original values
        let orig_dirs = std::env::var("RELIEVE_DATA_DIRS").ok();
        let orig_size = std::env::var("RELIEVE_CACHE_SIZE").ok();

        std::env::set_var("RELIEVE_DATA_DIRS", "/srv/dem");
        std::env::set_var("RELIEVE_CACHE_SIZE", "12");

        let builder = ElevationPipelineBuilder::from_env().unwrap();
        assert_eq!(builder.data_dirs, vec![PathBuf::from("/srv/dem")]);
        assert_eq!(builder.archive_cache_size, 12);

        // Restore original values
        match orig_dirs {
            Some(v) => std::env::set_var("RELIEVE_DATA_DIRS", v),
            None => std::env::remove_var("RELIEVE_DATA_DIRS"),
        }
        match orig_size {
            Some(v) => std::env::set_var("RELIEVE_CACHE_SIZE", v),
            None => std::env::remove_var("RELIEVE_CACHE_SIZE"),
        }
    }
}
