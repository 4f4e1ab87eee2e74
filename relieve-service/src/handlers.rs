//! HTTP request handlers for the elevation service.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use relieve::{Bounds, IndexEntry, LatLng, ProfilePoint, ProfileSummary, TerrainError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::AppState;

/// Largest number of points accepted by the profile endpoint.
pub const MAX_PROFILE_POINTS: usize = 10_000;

/// Query parameters for the elevation endpoint.
#[derive(Debug, Deserialize)]
pub struct ElevationQuery {
    /// Latitude in decimal degrees (-90 to 90).
    pub lat: f64,
    /// Longitude in decimal degrees (-180 to 180).
    pub lng: f64,
}

/// Elevation at a point.
#[derive(Debug, Serialize, ToSchema)]
pub struct ElevationResponse {
    /// Latitude queried.
    pub lat: f64,
    /// Longitude queried.
    pub lng: f64,
    /// Elevation in meters, or null when no trustworthy value exists.
    pub elevation: Option<f64>,
}

/// Query parameters for the tile endpoint.
#[derive(Debug, Deserialize)]
pub struct TileQuery {
    /// Northern edge, latitude in degrees.
    pub north: f64,
    /// Southern edge, latitude in degrees.
    pub south: f64,
    /// Eastern edge, longitude in degrees.
    pub east: f64,
    /// Western edge, longitude in degrees.
    pub west: f64,
}

/// Geographic bounding box.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BoundsBody {
    /// Northern edge, latitude in degrees.
    pub north: f64,
    /// Southern edge, latitude in degrees.
    pub south: f64,
    /// Eastern edge, longitude in degrees.
    pub east: f64,
    /// Western edge, longitude in degrees.
    pub west: f64,
}

impl From<Bounds> for BoundsBody {
    fn from(b: Bounds) -> Self {
        Self {
            north: b.north,
            south: b.south,
            east: b.east,
            west: b.west,
        }
    }
}

/// The index entry covering a bounding box.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TileResponse {
    /// Tile identifier.
    pub id: String,
    /// Raster file name, inside the archive when there is one.
    pub filename: String,
    /// Tile coverage.
    pub bounds: BoundsBody,
    /// Region the tile belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Archive holding the raster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_file: Option<String>,
}

impl From<IndexEntry> for TileResponse {
    fn from(entry: IndexEntry) -> Self {
        Self {
            id: entry.id,
            filename: entry.filename,
            bounds: entry.bounds.into(),
            region: entry.region,
            archive_file: entry.archive_file,
        }
    }
}

/// A route vertex.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct PointBody {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
}

/// Request body for the profile endpoint.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ProfileRequest {
    /// Route vertices in traversal order.
    pub points: Vec<PointBody>,
}

/// One point of a returned profile.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePointBody {
    /// Latitude of the route vertex.
    pub lat: f64,
    /// Longitude of the route vertex.
    pub lng: f64,
    /// Elevation in meters, or null.
    pub elevation: Option<f64>,
    /// Meters along the route from the first point.
    pub distance_from_start: f64,
    /// Slope of the segment ending here, in percent (±100).
    pub slope_percent: f64,
}

impl From<ProfilePoint> for ProfilePointBody {
    fn from(p: ProfilePoint) -> Self {
        Self {
            lat: p.lat,
            lng: p.lng,
            elevation: p.elevation,
            distance_from_start: p.distance_from_start,
            slope_percent: p.slope_percent,
        }
    }
}

/// Aggregate figures for a profile.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SummaryBody {
    /// Lowest elevation in meters, null when no point has one.
    pub min: Option<f64>,
    /// Highest elevation in meters.
    pub max: Option<f64>,
    /// Mean elevation in meters.
    pub mean: Option<f64>,
    /// Sum of elevation gains in meters.
    pub total_ascent: f64,
    /// Sum of elevation losses in meters.
    pub total_descent: f64,
    /// Route length in meters.
    pub distance: f64,
    /// Number of route points.
    pub samples: usize,
    /// Points without an elevation.
    pub missing: usize,
}

impl From<ProfileSummary> for SummaryBody {
    fn from(s: ProfileSummary) -> Self {
        Self {
            min: s.min,
            max: s.max,
            mean: s.mean,
            total_ascent: s.total_ascent,
            total_descent: s.total_descent,
            distance: s.distance,
            samples: s.samples,
            missing: s.missing,
        }
    }
}

/// Response of the profile endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileResponse {
    /// Profile points in route order.
    pub points: Vec<ProfilePointBody>,
    /// Aggregates over the whole route.
    pub summary: SummaryBody,
}

/// Error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Cache statistics response.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    /// Archives in cache.
    pub archive_entries: u64,
    /// Archive requests served.
    pub archive_requests: u64,
    /// Archive requests that had to fetch.
    pub archive_fetches: u64,
    /// Decoded rasters in cache.
    pub raster_entries: u64,
    /// Region sub-indexes loaded.
    pub regions_loaded: u64,
    /// Archive cache hit rate (0.0 to 1.0).
    pub hit_rate: f64,
}

/// Get elevation for given coordinates.
///
/// # Returns
///
/// - `200 OK` with the elevation, `null` when no tile covers the point or
///   the sample was rejected
/// - `400 Bad Request` if coordinates are invalid
/// - `503 Service Unavailable` if the index or an archive cannot be read
#[utoipa::path(
    get,
    path = "/elevation",
    params(
        ("lat" = f64, Query, description = "Latitude in decimal degrees"),
        ("lng" = f64, Query, description = "Longitude in decimal degrees"),
    ),
    responses(
        (status = 200, description = "Elevation sampled", body = ElevationResponse),
        (status = 400, description = "Invalid coordinates", body = ErrorResponse),
        (status = 503, description = "Elevation data unavailable", body = ErrorResponse),
    ),
    tag = "elevation"
)]
pub async fn get_elevation(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ElevationQuery>,
) -> impl IntoResponse {
    tracing::debug!(lat = query.lat, lng = query.lng, "Elevation query");

    match state.pipeline.elevation_at(query.lat, query.lng).await {
        Ok(elevation) => {
            tracing::info!(
                lat = query.lat,
                lng = query.lng,
                elevation = ?elevation,
                "Elevation sampled"
            );
            (
                StatusCode::OK,
                Json(ElevationResponse {
                    lat: query.lat,
                    lng: query.lng,
                    elevation,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Resolve the tile covering a bounding box.
///
/// # Returns
///
/// - `200 OK` with the index entry
/// - `404 Not Found` if no single tile contains the box
#[utoipa::path(
    get,
    path = "/tile",
    params(
        ("north" = f64, Query, description = "Northern latitude"),
        ("south" = f64, Query, description = "Southern latitude"),
        ("east" = f64, Query, description = "Eastern longitude"),
        ("west" = f64, Query, description = "Western longitude"),
    ),
    responses(
        (status = 200, description = "Covering tile", body = TileResponse),
        (status = 400, description = "Invalid bounds", body = ErrorResponse),
        (status = 404, description = "No tile covers the bounds", body = ErrorResponse),
        (status = 503, description = "Index unavailable", body = ErrorResponse),
    ),
    tag = "elevation"
)]
pub async fn get_tile(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TileQuery>,
) -> impl IntoResponse {
    let bounds = Bounds::new(query.north, query.south, query.east, query.west);

    match state.pipeline.resolve_tile(&bounds).await {
        Ok(Some(entry)) => (StatusCode::OK, Json(TileResponse::from(entry))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "No tile covers the requested bounds".to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Build an elevation profile along a route.
#[utoipa::path(
    post,
    path = "/profile",
    request_body = ProfileRequest,
    responses(
        (status = 200, description = "Profile built", body = ProfileResponse),
        (status = 400, description = "Invalid route", body = ErrorResponse),
        (status = 503, description = "Elevation data unavailable", body = ErrorResponse),
    ),
    tag = "elevation"
)]
pub async fn post_profile(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProfileRequest>,
) -> impl IntoResponse {
    if request.points.is_empty() || request.points.len() > MAX_PROFILE_POINTS {
        return bad_request(format!(
            "Expected between 1 and {} points, got {}",
            MAX_PROFILE_POINTS,
            request.points.len()
        ));
    }

    let route: Vec<LatLng> = request
        .points
        .iter()
        .map(|p| LatLng::new(p.lat, p.lng))
        .collect();

    match state.pipeline.build_profile(&route).await {
        Ok(points) => {
            let summary = ProfileSummary::from_points(&points);
            tracing::info!(
                points = summary.samples,
                missing = summary.missing,
                distance = summary.distance,
                "Profile built"
            );
            (
                StatusCode::OK,
                Json(ProfileResponse {
                    points: points.into_iter().map(ProfilePointBody::from).collect(),
                    summary: summary.into(),
                }),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

fn bad_request(message: String) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message })).into_response()
}

/// Map a pipeline error onto a status code.
fn error_response(e: TerrainError) -> axum::response::Response {
    let status = match e.root() {
        TerrainError::InvalidCoordinates { .. } => StatusCode::BAD_REQUEST,
        _ if e.is_hard() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    tracing::warn!(status = status.as_u16(), error = %e, "Query failed");

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

/// Health check endpoint.
///
/// Returns service status and version.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse)),
    tag = "system"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Get cache statistics.
#[utoipa::path(
    get,
    path = "/stats",
    responses((status = 200, description = "Cache statistics", body = StatsResponse)),
    tag = "system"
)]
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let stats = state.pipeline.cache_stats().await;

    Json(StatsResponse {
        archive_entries: stats.archive_entries,
        archive_requests: stats.archive_requests,
        archive_fetches: stats.archive_fetches,
        raster_entries: stats.raster_entries,
        regions_loaded: stats.regions_loaded,
        hit_rate: stats.hit_rate(),
    })
}
