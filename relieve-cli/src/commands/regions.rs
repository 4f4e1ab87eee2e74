use anyhow::{Context, Result};

use super::Source;

pub async fn run(source: &Source, counts: bool) -> Result<()> {
    let pipeline = source.pipeline()?;
    let resolver = pipeline.resolver();

    let regions = resolver
        .regions()
        .await
        .context("Failed to load tile index")?;

    if regions.is_empty() {
        let tiles = resolver.tile_count().await?;
        println!("Flat index with {} tiles", tiles);
        return Ok(());
    }

    if !counts {
        for region in &regions {
            println!("{}", region);
        }
        println!("\nTotal: {} regions", regions.len());
        return Ok(());
    }

    let loaded = resolver.load_regions(&regions).await?;

    println!("{:<20} {:>8}", "REGION", "TILES");
    println!("{}", "-".repeat(29));

    let mut total = 0;
    let mut failed = 0;
    for (name, count) in &loaded {
        match count {
            Some(n) => {
                total += n;
                println!("{:<20} {:>8}", name, n);
            }
            None => {
                failed += 1;
                println!("{:<20} {:>8}", name, "error");
            }
        }
    }

    println!("{}", "-".repeat(29));
    println!("{:<20} {:>8}", "Total", total);
    if failed > 0 {
        println!("{} region(s) failed to load, see log output", failed);
    }

    Ok(())
}
