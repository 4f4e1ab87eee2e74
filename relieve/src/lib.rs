//! # relieve - terrain elevation pipeline
//!
//! Turns a point, a bounding box or a route into elevations sampled from
//! GeoTIFF tiles that are distributed inside compressed archive bundles.
//!
//! ## Features
//!
//! - **Two-tier index**: flat or regional (`provincias`) index documents, with
//!   region sub-indexes loaded only when a query needs them
//! - **Archive bundles**: gzip-wrapped block containers parsed in-crate, cached
//!   per archive path
//! - **Anomaly correction**: implausible or locally inconsistent samples are
//!   replaced by their neighbor mean or dropped
//! - **Profiles**: distance, slope and summary figures along a route
//! - **Async and cancellable**: shared in-flight loads, capped fan-out, and a
//!   [`CancelToken`] for every query
//!
//! ## Quick Start
//!
//! ```ignore
//! use relieve::{ElevationPipelineBuilder, LatLng};
//!
//! let pipeline = ElevationPipelineBuilder::new()
//!     .base_url("https://tiles.example.com/dem")
//!     .build()?;
//!
//! // A single point
//! if let Some(meters) = pipeline.elevation_at(-32.89, -68.83).await? {
//!     println!("Mendoza: {}m", meters);
//! }
//!
//! // A route
//! let route = [LatLng::new(-34.60, -58.38), LatLng::new(-34.61, -58.40)];
//! for point in pipeline.build_profile(&route).await? {
//!     println!("{:>8.0}m {:?}", point.distance_from_start, point.elevation);
//! }
//! ```
//!
//! ## Data Layout
//!
//! All paths are relative to the configured base URLs or data directories:
//!
//! ```text
//! index.json                 {"provincias": {"centro": {...}, "cuyo": {...}}}
//! centro/index.json          {"tiles": {"tile_1": {"filename": "tile_1.tif",
//!                                                  "archiveFile": "centro_01.tar",
//!                                                  "bounds": {...}}}}
//! centro_01.tar              gzip(container with tile_1.tif, tile_2.tif, ...)
//! ```
//!
//! A flat `{"tiles": {...}}` document at the index path skips the regional
//! tier. Entries without `archiveFile` point at a standalone raster,
//! optionally gzipped.
//!
//! ## Cargo Features
//!
//! - `http` (default): [`HttpFetcher`] via reqwest.

pub mod archive;
pub mod bounds;
pub mod cache;
pub mod cancel;
pub mod error;
pub mod fetch;
pub mod index;
pub mod pipeline;
pub mod profile;
pub mod raster;
pub mod region;
pub mod resolver;
pub mod sampler;

// Re-export main types at crate root for convenience
pub use bounds::{Bounds, LatLng};
pub use cache::{CacheStats, DEFAULT_ARCHIVE_CACHE_SIZE, DEFAULT_RASTER_CACHE_SIZE};
pub use cancel::CancelToken;
pub use error::{Result, TerrainError};
#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use fetch::{FallbackFetcher, Fetcher, FileFetcher, MemoryFetcher};
pub use index::IndexEntry;
pub use pipeline::{ElevationPipeline, ElevationPipelineBuilder, PreloadStats};
pub use profile::{haversine_distance, ProfilePoint, ProfileSummary};
pub use raster::RasterTile;
pub use region::RegionBand;
pub use resolver::TileIndexResolver;
pub use sampler::{AnomalyPolicy, ElevationSampler};
