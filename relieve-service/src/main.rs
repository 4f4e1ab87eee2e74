//! relieve-service - HTTP microservice for terrain elevation queries.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RELIEVE_BASE_URLS` | Comma-separated base URLs of the tile bundles | - |
//! | `RELIEVE_DATA_DIRS` | Comma-separated local data directories | current directory |
//! | `RELIEVE_INDEX_PATHS` | Comma-separated candidate index paths | `index.json,elevation/index.json` |
//! | `RELIEVE_CACHE_SIZE` | Maximum archives in cache | 32 |
//! | `RELIEVE_RASTER_CACHE_SIZE` | Maximum decoded rasters in cache (0 disables) | 8 |
//! | `RELIEVE_REGION_CACHE_SIZE` | Maximum region sub-indexes in cache | 64 |
//! | `RELIEVE_CONCURRENCY` | Batch fan-out | 4 |
//! | `RELIEVE_TIMEOUT_SECS` | HTTP fetch timeout | 30 |
//! | `RELIEVE_PORT` | HTTP server port | 8080 |
//! | `RELIEVE_PRELOAD` | `all`, or `north,south,east,west` areas separated by `;` | None |
//! | `RUST_LOG` | Log level (e.g., "info", "debug") | "info" |
//!
//! ## Endpoints
//!
//! - `GET /elevation?lat=X&lng=Y` - Elevation at a point
//! - `GET /tile?north=..&south=..&east=..&west=..` - Tile covering a box
//! - `POST /profile` - Route elevation profile
//! - `GET /health` - Health check
//! - `GET /stats` - Cache statistics
//! - `GET /docs` - OpenAPI documentation (Swagger UI)

use std::net::SocketAddr;
use std::sync::Arc;

use relieve::ElevationPipelineBuilder;
use relieve_service::{parse_preload_bounds, router, AppState};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relieve_service=info,relieve=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load port from environment (service-specific config)
    let port: u16 = std::env::var("RELIEVE_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // The library reads the RELIEVE_* pipeline variables
    let builder = match ElevationPipelineBuilder::from_env() {
        Ok(builder) => builder,
        Err(_) => {
            tracing::warn!("Neither RELIEVE_BASE_URLS nor RELIEVE_DATA_DIRS set, using current directory");
            ElevationPipelineBuilder::new().data_dir(".")
        }
    };
    let pipeline = builder.build()?;

    tracing::info!(
        source = %pipeline.fetcher().describe(),
        index_paths = ?pipeline.resolver().index_paths(),
        concurrency = pipeline.concurrency(),
        port = port,
        "Starting relieve service"
    );

    if let Ok(preload_val) = std::env::var("RELIEVE_PRELOAD") {
        let areas = parse_preload_bounds(&preload_val);
        let areas_ref = areas.as_deref();
        tracing::info!(
            areas = ?areas_ref.map(|a| a.len()),
            "Preloading archives into cache"
        );
        match pipeline.preload(areas_ref).await {
            Ok(stats) => tracing::info!(
                tiles_matched = stats.tiles_matched,
                archives_loaded = stats.archives_loaded,
                archives_already_cached = stats.archives_already_cached,
                archives_failed = stats.archives_failed,
                elapsed_ms = stats.elapsed_ms,
                "Preload complete"
            ),
            Err(e) => tracing::warn!(error = %e, "Preload failed, serving without warm cache"),
        }
    }

    let state = Arc::new(AppState { pipeline });

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
