use anyhow::{Context, Result};
use serde::Serialize;

use super::Source;

#[derive(Serialize)]
struct ElevationResponse {
    lat: f64,
    lng: f64,
    elevation: Option<f64>,
}

pub async fn run(source: &Source, lat: f64, lng: f64, json: bool) -> Result<()> {
    let pipeline = source.pipeline()?;

    let elevation = pipeline
        .elevation_at(lat, lng)
        .await
        .context("Failed to get elevation")?;

    if json {
        let response = ElevationResponse {
            lat,
            lng,
            elevation,
        };
        println!("{}", serde_json::to_string(&response)?);
    } else {
        match elevation {
            Some(elev) => println!("{:.2}", elev),
            None => println!("no data"),
        }
    }

    Ok(())
}
