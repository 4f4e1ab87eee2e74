//! Tile index resolution.
//!
//! [`TileIndexResolver`] answers "which tile covers this bounding box?". The
//! global index is fetched once, on first use, from the first candidate path
//! that yields a valid document; concurrent callers wait on the same load. In
//! a regional index, the sub-index of each region is fetched at most once per
//! resolver and kept in a bounded cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use moka::future::Cache;
use tokio::sync::OnceCell;

use crate::bounds::Bounds;
use crate::error::{Result, TerrainError};
use crate::fetch::Fetcher;
use crate::index::{parse_region_index, IndexDocument, IndexEntry, RegionRef, TileSet};
use crate::region::{coverage, default_bands, probe_order, RegionBand};

/// Candidate locations of the global index, tried in order.
pub const DEFAULT_INDEX_PATHS: &[&str] = &["index.json", "elevation/index.json"];

/// Regions tried per query in a regional index, the guess included.
pub const DEFAULT_MAX_REGION_PROBES: usize = 3;

/// Default number of region sub-indexes kept in memory.
pub const DEFAULT_REGION_CACHE_SIZE: u64 = 64;

/// Default fan-out when loading several region sub-indexes.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Resolves bounding boxes to index entries.
#[derive(Debug)]
pub struct TileIndexResolver {
    fetcher: Arc<dyn Fetcher>,
    index_paths: Vec<String>,
    bands: Vec<RegionBand>,
    max_region_probes: usize,
    concurrency: usize,
    document: OnceCell<Arc<IndexDocument>>,
    regions: Cache<String, Arc<TileSet>>,
    regions_loaded: AtomicU64,
}

impl TileIndexResolver {
    /// Create a resolver reading the index through `fetcher`.
    ///
    /// Uses [`DEFAULT_INDEX_PATHS`], the default band table and
    /// [`DEFAULT_MAX_REGION_PROBES`].
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            index_paths: DEFAULT_INDEX_PATHS.iter().map(|p| p.to_string()).collect(),
            bands: default_bands(),
            max_region_probes: DEFAULT_MAX_REGION_PROBES,
            concurrency: DEFAULT_CONCURRENCY,
            document: OnceCell::new(),
            regions: Cache::builder().max_capacity(DEFAULT_REGION_CACHE_SIZE).build(),
            regions_loaded: AtomicU64::new(0),
        }
    }

    /// Replace the candidate index paths.
    pub fn with_index_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the band table used to guess regions.
    pub fn with_bands(mut self, bands: Vec<RegionBand>) -> Self {
        self.bands = bands;
        self
    }

    /// Set how many regions a query may probe (at least one).
    pub fn with_max_region_probes(mut self, probes: usize) -> Self {
        self.max_region_probes = probes.max(1);
        self
    }

    /// Set how many region sub-indexes stay in memory (at least one).
    ///
    /// An index with more regions than this refetches evicted sub-indexes.
    pub fn with_region_cache_size(mut self, capacity: u64) -> Self {
        self.regions = Cache::builder().max_capacity(capacity.max(1)).build();
        self
    }

    /// Maximum number of cached region sub-indexes.
    pub fn region_cache_size(&self) -> u64 {
        self.regions.policy().max_capacity().unwrap_or(0)
    }

    /// Set the fan-out for [`TileIndexResolver::load_regions`] (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Candidate index paths.
    pub fn index_paths(&self) -> &[String] {
        &self.index_paths
    }

    /// The global index document, loading it on first use.
    ///
    /// A failed load leaves nothing behind, so the next call tries again.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::IndexLoad`] when no candidate path yields a
    /// valid document.
    pub async fn index(&self) -> Result<Arc<IndexDocument>> {
        self.document
            .get_or_try_init(|| self.load_index())
            .await
            .cloned()
    }

    async fn load_index(&self) -> Result<Arc<IndexDocument>> {
        let mut attempts = Vec::with_capacity(self.index_paths.len());

        for path in &self.index_paths {
            let document = match self.fetcher.fetch(path).await {
                Ok(bytes) => IndexDocument::parse(&bytes),
                Err(e) => Err(e),
            };

            match document {
                Ok(document) => {
                    match &document {
                        IndexDocument::Flat(tiles) => {
                            tracing::info!(path = %path, tiles = tiles.len(), "Loaded flat tile index")
                        }
                        IndexDocument::Regional(regions) => {
                            tracing::info!(path = %path, regions = regions.len(), "Loaded regional tile index");
                            let capacity = self.region_cache_size();
                            if regions.len() as u64 > capacity {
                                tracing::warn!(
                                    regions = regions.len(),
                                    capacity,
                                    "Index has more regions than the region cache holds; evicted sub-indexes will be fetched again"
                                );
                            }
                        }
                    }
                    return Ok(Arc::new(document));
                }
                Err(e) => {
                    tracing::debug!(path = %path, error = %e, "Index candidate rejected");
                    attempts.push(format!("{}: {}", path, e));
                }
            }
        }

        Err(TerrainError::IndexLoad { attempts })
    }

    /// The tiles of one region, fetching its sub-index on first use.
    pub async fn region_tiles(&self, region: &RegionRef) -> Result<Arc<TileSet>> {
        self.regions
            .try_get_with(region.name.clone(), async {
                let tiles = match &region.tiles {
                    Some(inline) => inline.clone(),
                    None => {
                        let path = region
                            .index
                            .clone()
                            .unwrap_or_else(|| format!("{}/index.json", region.name));
                        let bytes = self.fetcher.fetch(&path).await?;
                        let tiles = parse_region_index(&bytes, &region.name)?;
                        tracing::debug!(region = %region.name, path = %path, tiles = tiles.len(), "Loaded region index");
                        tiles
                    }
                };
                self.regions_loaded.fetch_add(1, Ordering::Relaxed);
                Ok::<_, TerrainError>(Arc::new(tiles))
            })
            .await
            .map_err(TerrainError::from_shared)
    }

    /// Resolve the entry whose bounds fully contain `bounds`.
    ///
    /// Returns `Ok(None)` when no tile covers the box. In a regional index
    /// the guessed region is searched first, then the nearest other regions
    /// up to the probe limit; a region whose sub-index cannot be loaded is
    /// skipped.
    ///
    /// # Errors
    ///
    /// Only a failure to load the global index is reported.
    pub async fn resolve_tile(&self, bounds: &Bounds) -> Result<Option<IndexEntry>> {
        let index = self.index().await?;

        let regions = match index.as_ref() {
            IndexDocument::Flat(tiles) => return Ok(tiles.find(bounds).cloned()),
            IndexDocument::Regional(regions) => regions,
        };

        let declared: Vec<(String, Option<Bounds>)> =
            regions.iter().map(|r| (r.name.clone(), r.bounds)).collect();
        let order = probe_order(&declared, &self.bands, bounds.centroid());

        for name in order.iter().take(self.max_region_probes) {
            let Some(region) = regions.iter().find(|r| &r.name == name) else {
                continue;
            };

            match self.region_tiles(region).await {
                Ok(tiles) => {
                    if let Some(entry) = tiles.find(bounds) {
                        return Ok(Some(entry.clone()));
                    }
                    tracing::trace!(region = %name, "Region has no covering tile");
                }
                Err(e) => {
                    tracing::warn!(region = %name, error = %e, "Skipping region whose index failed to load");
                }
            }
        }

        Ok(None)
    }

    /// Names of the regions in a regional index; empty for a flat index.
    pub async fn regions(&self) -> Result<Vec<String>> {
        Ok(match self.index().await?.as_ref() {
            IndexDocument::Flat(_) => Vec::new(),
            IndexDocument::Regional(regions) => regions.iter().map(|r| r.name.clone()).collect(),
        })
    }

    /// Number of tile entries currently loaded.
    pub async fn tile_count(&self) -> Result<usize> {
        let index = self.index().await?;
        match index.as_ref() {
            IndexDocument::Flat(tiles) => Ok(tiles.len()),
            IndexDocument::Regional(regions) => {
                let mut count = 0;
                for region in regions {
                    if let Some(tiles) = self.regions.get(&region.name).await {
                        count += tiles.len();
                    }
                }
                Ok(count)
            }
        }
    }

    /// Load several region sub-indexes with capped concurrency.
    ///
    /// Returns each requested name with its tile count, or `None` when the
    /// region is unknown or failed to load. Results follow the input order.
    pub async fn load_regions(&self, names: &[String]) -> Result<Vec<(String, Option<usize>)>> {
        let index = self.index().await?;
        let regions: &[RegionRef] = match index.as_ref() {
            IndexDocument::Flat(_) => &[],
            IndexDocument::Regional(regions) => regions,
        };

        let mut loaded: Vec<(usize, Option<usize>)> = stream::iter(names.iter().enumerate())
            .map(|(i, name)| async move {
                let Some(region) = regions.iter().find(|r| &r.name == name) else {
                    tracing::warn!(region = %name, "Unknown region");
                    return (i, None);
                };
                match self.region_tiles(region).await {
                    Ok(tiles) => (i, Some(tiles.len())),
                    Err(e) => {
                        tracing::warn!(region = %name, error = %e, "Region index failed to load");
                        (i, None)
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        loaded.sort_by_key(|(i, _)| *i);

        Ok(loaded
            .into_iter()
            .map(|(i, count)| (names[i].clone(), count))
            .collect())
    }

    /// Every entry whose bounds intersect `area`.
    ///
    /// In a regional index, regions whose known coverage misses `area` are
    /// not loaded; regions without known coverage are.
    pub async fn entries_in(&self, area: &Bounds) -> Result<Vec<IndexEntry>> {
        let index = self.index().await?;
        let regions = match index.as_ref() {
            IndexDocument::Flat(tiles) => {
                return Ok(tiles
                    .entries()
                    .iter()
                    .filter(|e| e.bounds.intersects(area))
                    .cloned()
                    .collect())
            }
            IndexDocument::Regional(regions) => regions,
        };

        let candidates: Vec<String> = regions
            .iter()
            .filter(|r| {
                coverage(&r.name, r.bounds, &self.bands).map_or(true, |b| b.intersects(area))
            })
            .map(|r| r.name.clone())
            .collect();
        self.load_regions(&candidates).await?;

        let mut entries = Vec::new();
        for name in &candidates {
            if let Some(tiles) = self.regions.get(name).await {
                entries.extend(
                    tiles
                        .entries()
                        .iter()
                        .filter(|e| e.bounds.intersects(area))
                        .cloned(),
                );
            }
        }
        Ok(entries)
    }

    /// Region sub-indexes loaded since creation or the last clear.
    pub fn regions_loaded(&self) -> u64 {
        self.regions_loaded.load(Ordering::Relaxed)
    }

    /// Drop cached region sub-indexes. The global index is kept.
    pub fn clear(&self) {
        self.regions.invalidate_all();
        self.regions_loaded.store(0, Ordering::Relaxed);
    }
}
