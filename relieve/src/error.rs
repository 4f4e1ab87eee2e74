//! Error types for the relieve library.

use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while retrieving elevation data.
///
/// Not every condition in the pipeline is an error: a query with no covering
/// tile, a member missing from its archive, or a correctable anomaly all
/// resolve to "no value" at the [`ElevationPipeline`](crate::ElevationPipeline)
/// level. Only [`TerrainError::is_hard`] failures reach callers of the
/// high-level operations.
#[derive(Error, Debug)]
pub enum TerrainError {
    /// IO error when reading local files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// None of the candidate index locations could be fetched and parsed.
    #[error("Failed to load tile index from any of: {}", attempts.join(", "))]
    IndexLoad {
        /// One "path: reason" line per candidate that was tried.
        attempts: Vec<String>,
    },

    /// The index document is not one of the supported shapes.
    #[error("Invalid index document: {0}")]
    IndexFormat(String),

    /// A payload could not be fetched from any base location.
    #[error("Failed to fetch {path}: {reason}")]
    FetchFailed {
        /// Path relative to the fetcher's base locations.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// The archive is neither a valid gzip stream nor an uncompressed container.
    #[error("Failed to decompress {path}: {reason}")]
    Decompression {
        /// Archive path.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// The container structure is broken (bad size field, truncated member).
    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    /// The requested member is not present in the archive.
    #[error("Member {member} not found in {archive}")]
    MemberNotFound {
        /// Archive path.
        archive: String,
        /// Requested member name.
        member: String,
    },

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Raster decoded but lacks usable georeferencing.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// Coordinates are not valid WGS84 degrees.
    #[error("Invalid coordinates: lat={lat}, lng={lng} (valid: lat ±90°, lng ±180°)")]
    InvalidCoordinates {
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lng: f64,
    },

    /// The operation was abandoned through its [`CancelToken`](crate::CancelToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// A blocking decode task panicked or was aborted.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Invalid pipeline configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An error produced once by a coalesced cache load and shared with every waiter.
    #[error(transparent)]
    Shared(Arc<TerrainError>),
}

impl TerrainError {
    /// Unwrap an error handed back by a coalesced cache load.
    pub(crate) fn from_shared(err: Arc<TerrainError>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(TerrainError::Shared)
    }

    /// The underlying error, looking through [`TerrainError::Shared`].
    pub fn root(&self) -> &TerrainError {
        match self {
            TerrainError::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// Whether this failure must propagate to the caller.
    ///
    /// Index load failures, decompression failures (after the uncompressed
    /// fallback), invalid input and cancellation are hard. Everything else
    /// degrades to an absent elevation.
    pub fn is_hard(&self) -> bool {
        matches!(
            self.root(),
            TerrainError::IndexLoad { .. }
                | TerrainError::IndexFormat(_)
                | TerrainError::Decompression { .. }
                | TerrainError::InvalidCoordinates { .. }
                | TerrainError::Cancelled
                | TerrainError::Config(_)
        )
    }
}

/// Result type alias using [`TerrainError`].
pub type Result<T> = std::result::Result<T, TerrainError>;
