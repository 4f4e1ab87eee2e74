//! Basic example demonstrating relieve library usage.
//!
//! Run with: cargo run --example basic -- /path/to/elevation/data

use relieve::{ElevationPipelineBuilder, LatLng, ProfileSummary, TerrainError};
use std::env;

#[tokio::main]
async fn main() -> Result<(), TerrainError> {
    // Get data directory from command line
    let data_dir = env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: cargo run --example basic -- /path/to/elevation/data");
        std::process::exit(1);
    });

    // Keep up to 16 archives in memory
    let pipeline = ElevationPipelineBuilder::new()
        .data_dir(&data_dir)
        .archive_cache_size(16)
        .build()?;

    let locations = [
        ("Aconcagua", -32.6532, -70.0109),
        ("Córdoba", -31.4201, -64.1888),
        ("Buenos Aires", -34.6037, -58.3816),
    ];

    println!("Elevation queries:");
    println!("{:-<50}", "");

    for (name, lat, lng) in &locations {
        match pipeline.elevation_at(*lat, *lng).await {
            Ok(Some(elevation)) => println!("{}: {}m", name, elevation),
            Ok(None) => println!("{}: no data", name),
            Err(e) => println!("{}: error - {}", name, e),
        }
    }

    // A short route across Buenos Aires
    let route: Vec<LatLng> = (0..=10)
        .map(|i| LatLng::new(-34.60 - i as f64 * 0.002, -58.38 - i as f64 * 0.003))
        .collect();
    let profile = pipeline.build_profile(&route).await?;
    let summary = ProfileSummary::from_points(&profile);

    println!("\nProfile:");
    println!("  Distance: {:.0}m", summary.distance);
    println!("  Ascent: {:.1}m, descent: {:.1}m", summary.total_ascent, summary.total_descent);
    println!("  Missing samples: {}/{}", summary.missing, summary.samples);

    // Show cache statistics
    let stats = pipeline.cache_stats().await;
    println!("\nCache statistics:");
    println!("  Cached archives: {}", stats.archive_entries);
    println!("  Cached rasters: {}", stats.raster_entries);
    println!("  Hit rate: {:.1}%", stats.hit_rate() * 100.0);

    Ok(())
}
