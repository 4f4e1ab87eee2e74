use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use relieve::{LatLng, ProfilePoint, ProfileSummary};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::Source;

pub async fn run(
    source: &Source,
    input: PathBuf,
    output: Option<PathBuf>,
    lat_col: &str,
    lng_col: &str,
) -> Result<()> {
    let pipeline = source.pipeline()?;

    let route = read_route(&input, lat_col, lng_col)?;
    if route.is_empty() {
        bail!("No coordinates found in {}", input.display());
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    pb.set_message(format!("Sampling {} points", route.len()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let profile = pipeline.build_profile(&route).await;
    pb.finish_and_clear();
    let profile = profile.context("Failed to build profile")?;

    // Prepare output
    let output_path = output.unwrap_or_else(|| {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "route".to_string());
        input.with_file_name(format!("{}_profile.csv", stem))
    });
    let output_file = File::create(&output_path).context("Failed to create output file")?;
    write_profile(BufWriter::new(output_file), &profile)?;

    print_summary(&ProfileSummary::from_points(&profile));
    println!("Output written to: {}", output_path.display());
    Ok(())
}

/// Read an ordered route from a CSV or GeoJSON file.
fn read_route(input: &Path, lat_col: &str, lng_col: &str) -> Result<Vec<LatLng>> {
    let extension = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let file = File::open(input).context("Failed to open input file")?;
    let reader = BufReader::new(file);

    match extension.as_str() {
        "csv" => read_csv(reader, lat_col, lng_col),
        "geojson" | "json" => read_geojson(reader),
        _ => bail!(
            "Unsupported file format: {}. Use .csv or .geojson",
            extension
        ),
    }
}

fn read_csv<R: Read>(reader: R, lat_col: &str, lng_col: &str) -> Result<Vec<LatLng>> {
    let mut reader = csv::Reader::from_reader(reader);

    // Find column indices
    let headers = reader.headers()?.clone();
    let lat_idx = headers
        .iter()
        .position(|h| h.trim() == lat_col)
        .with_context(|| format!("Column '{}' not found in CSV", lat_col))?;
    let lng_idx = headers
        .iter()
        .position(|h| h.trim() == lng_col)
        .with_context(|| format!("Column '{}' not found in CSV", lng_col))?;

    let mut route = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {} on row {}", name, line + 1))?
                .trim()
                .parse()
                .with_context(|| format!("Invalid {} on row {}", name, line + 1))
        };
        route.push(LatLng::new(field(lat_idx, "latitude")?, field(lng_idx, "longitude")?));
    }
    Ok(route)
}

/// Positions of the first LineString or MultiPoint found in the document.
fn read_geojson<R: Read>(reader: R) -> Result<Vec<LatLng>> {
    let geojson: geojson::GeoJson =
        serde_json::from_reader(reader).context("Failed to parse GeoJSON")?;

    let geometries: Vec<geojson::Geometry> = match geojson {
        geojson::GeoJson::Geometry(geometry) => vec![geometry],
        geojson::GeoJson::Feature(feature) => feature.geometry.into_iter().collect(),
        geojson::GeoJson::FeatureCollection(fc) => fc
            .features
            .into_iter()
            .filter_map(|f| f.geometry)
            .collect(),
    };

    for geometry in geometries {
        match geometry.value {
            geojson::Value::LineString(positions) | geojson::Value::MultiPoint(positions) => {
                return positions
                    .iter()
                    .map(|pos| match pos[..] {
                        [lng, lat, ..] => Ok(LatLng::new(lat, lng)),
                        _ => bail!("Position with fewer than two coordinates"),
                    })
                    .collect();
            }
            _ => continue,
        }
    }

    bail!("GeoJSON contains no LineString or MultiPoint geometry")
}

/// Write `lat,lng,elevation,distance_m,slope_percent` rows; missing elevations are empty.
fn write_profile<W: Write>(writer: W, profile: &[ProfilePoint]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(["lat", "lng", "elevation", "distance_m", "slope_percent"])?;

    for point in profile {
        writer.write_record([
            point.lat.to_string(),
            point.lng.to_string(),
            point.elevation.map(|e| format!("{:.2}", e)).unwrap_or_default(),
            format!("{:.2}", point.distance_from_start),
            format!("{:.2}", point.slope_percent),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn print_summary(summary: &ProfileSummary) {
    let meters = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.1}m", v));

    println!("Points:    {} ({} without data)", summary.samples, summary.missing);
    println!("Distance:  {:.0}m", summary.distance);
    println!(
        "Elevation: min {}  max {}  mean {}",
        meters(summary.min),
        meters(summary.max),
        meters(summary.mean)
    );
    println!(
        "Ascent:    {:.1}m  descent {:.1}m",
        summary.total_ascent, summary.total_descent
    );
}
