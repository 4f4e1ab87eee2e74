use anyhow::{Context, Result};
use relieve::Bounds;

use super::Source;

pub async fn run(
    source: &Source,
    north: f64,
    south: f64,
    east: f64,
    west: f64,
    json: bool,
) -> Result<()> {
    let pipeline = source.pipeline()?;
    let bounds = Bounds::new(north, south, east, west);

    let entry = pipeline
        .resolve_tile(&bounds)
        .await
        .context("Failed to resolve tile")?;

    let Some(entry) = entry else {
        if json {
            println!("null");
        } else {
            println!("No tile covers the requested bounds");
        }
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    println!("Tile:     {}", entry.id);
    println!("File:     {}", entry.filename);
    if let Some(archive) = &entry.archive_file {
        println!("Archive:  {}", archive);
    }
    if let Some(region) = &entry.region {
        println!("Region:   {}", region);
    }
    println!(
        "Bounds:   N {:.4}  S {:.4}  E {:.4}  W {:.4}",
        entry.bounds.north, entry.bounds.south, entry.bounds.east, entry.bounds.west
    );

    Ok(())
}
