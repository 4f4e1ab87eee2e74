//! relieve service library
//!
//! HTTP handlers, router and OpenAPI document for the elevation service.
//! This library is used by both the relieve-service binary and integration tests.

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use relieve::{Bounds, ElevationPipeline};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across handlers.
pub struct AppState {
    /// Elevation pipeline serving every query.
    pub pipeline: ElevationPipeline,
}

// Re-export commonly used types for convenience
pub use handlers::{
    ElevationQuery, ElevationResponse, ErrorResponse, HealthResponse, ProfileRequest,
    ProfileResponse, StatsResponse, TileQuery, TileResponse,
};

/// OpenAPI documentation for the relieve service.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "relieve Elevation Service",
        version = "0.1.0",
        description = "REST API for terrain elevations and route profiles sampled from archived GeoTIFF tiles.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    paths(
        handlers::get_elevation,
        handlers::get_tile,
        handlers::post_profile,
        handlers::health_check,
        handlers::get_stats,
    ),
    components(
        schemas(
            handlers::ElevationResponse,
            handlers::TileResponse,
            handlers::BoundsBody,
            handlers::PointBody,
            handlers::ProfileRequest,
            handlers::ProfileResponse,
            handlers::ProfilePointBody,
            handlers::SummaryBody,
            handlers::ErrorResponse,
            handlers::HealthResponse,
            handlers::StatsResponse,
        )
    ),
    tags(
        (name = "elevation", description = "Elevation query endpoints"),
        (name = "system", description = "System and health endpoints")
    )
)]
pub struct ApiDoc;

/// Build the application router with documentation routes.
///
/// Middleware (tracing, CORS) is layered on by the binary.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/elevation", get(handlers::get_elevation))
        .route("/tile", get(handlers::get_tile))
        .route("/profile", post(handlers::post_profile))
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::get_stats))
        .with_state(state)
}

/// Parse the `RELIEVE_PRELOAD` environment variable value into areas.
///
/// Supported formats:
/// - `true`, `all`, `1`: preload every tile (returns `None`)
/// - `north,south,east,west`: a single area
/// - `north,south,east,west;north,south,east,west`: several areas
pub fn parse_preload_bounds(value: &str) -> Option<Vec<Bounds>> {
    let trimmed = value.trim();

    match trimmed.to_lowercase().as_str() {
        "true" | "all" | "1" => return None,
        _ => {}
    }

    let areas: Vec<Bounds> = trimmed
        .split(';')
        .filter_map(|area| {
            let parts: Vec<f64> = area
                .split(',')
                .filter_map(|s| s.trim().parse::<f64>().ok())
                .collect();
            let bounds = match parts[..] {
                [north, south, east, west] => Bounds::new(north, south, east, west),
                _ => {
                    tracing::warn!(
                        area = area,
                        "Invalid preload area, expected north,south,east,west"
                    );
                    return None;
                }
            };
            if !bounds.is_valid() {
                tracing::warn!(area = area, "Preload area out of range");
                return None;
            }
            Some(bounds)
        })
        .collect();

    if areas.is_empty() {
        tracing::warn!(
            value = trimmed,
            "Could not parse RELIEVE_PRELOAD value, preloading all tiles"
        );
        None
    } else {
        Some(areas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preload_all() {
        assert_eq!(parse_preload_bounds("all"), None);
        assert_eq!(parse_preload_bounds(" TRUE "), None);
        assert_eq!(parse_preload_bounds("1"), None);
    }

    #[test]
    fn test_parse_preload_areas() {
        let areas = parse_preload_bounds("-34,-35,-58,-59; -32,-33,-68,-69").unwrap();
        assert_eq!(
            areas,
            vec![
                Bounds::new(-34.0, -35.0, -58.0, -59.0),
                Bounds::new(-32.0, -33.0, -68.0, -69.0),
            ]
        );
    }

    #[test]
    fn test_parse_preload_skips_invalid_areas() {
        let areas = parse_preload_bounds("-34,-35,-58;-34,-35,-58,-59;95,-35,-58,-59").unwrap();
        assert_eq!(areas, vec![Bounds::new(-34.0, -35.0, -58.0, -59.0)]);

        assert_eq!(parse_preload_bounds("garbage"), None);
    }
}
