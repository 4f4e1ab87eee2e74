use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

/// Terrain elevation CLI tool
#[derive(Parser)]
#[command(name = "relieve")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the tile bundles (repeatable)
    #[arg(
        short,
        long = "base-url",
        env = "RELIEVE_BASE_URLS",
        value_delimiter = ',',
        global = true
    )]
    base_urls: Vec<String>,

    /// Local directory holding the tile bundles (repeatable)
    #[arg(
        short,
        long = "data-dir",
        env = "RELIEVE_DATA_DIRS",
        value_delimiter = ',',
        global = true
    )]
    data_dirs: Vec<PathBuf>,

    /// Candidate index paths, tried in order
    #[arg(
        long = "index-path",
        env = "RELIEVE_INDEX_PATHS",
        value_delimiter = ',',
        global = true
    )]
    index_paths: Vec<String>,

    /// Maximum archives in cache
    #[arg(
        short,
        long,
        env = "RELIEVE_CACHE_SIZE",
        default_value = "32",
        global = true
    )]
    cache_size: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query elevation for a single coordinate
    Query {
        /// Latitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Build an elevation profile along a route read from a file
    Profile {
        /// Input file (CSV, or GeoJSON LineString / MultiPoint)
        input: PathBuf,

        /// Output CSV file (defaults to <input>_profile.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Column name for latitude (CSV only)
        #[arg(long, default_value = "lat")]
        lat_col: String,

        /// Column name for longitude (CSV only)
        #[arg(long, default_value = "lng")]
        lng_col: String,
    },

    /// Show the tile covering a bounding box
    Tile {
        #[arg(long, allow_negative_numbers = true)]
        north: f64,
        #[arg(long, allow_negative_numbers = true)]
        south: f64,
        #[arg(long, allow_negative_numbers = true)]
        east: f64,
        #[arg(long, allow_negative_numbers = true)]
        west: f64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List the regions of the tile index
    Regions {
        /// Also load every region and count its tiles
        #[arg(long)]
        counts: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let source = commands::Source {
        base_urls: cli.base_urls,
        data_dirs: cli.data_dirs,
        index_paths: cli.index_paths,
        cache_size: cli.cache_size,
    };

    match cli.command {
        Commands::Query { lat, lng, json } => commands::query::run(&source, lat, lng, json).await,
        Commands::Profile {
            input,
            output,
            lat_col,
            lng_col,
        } => commands::profile::run(&source, input, output, &lat_col, &lng_col).await,
        Commands::Tile {
            north,
            south,
            east,
            west,
            json,
        } => commands::tile::run(&source, north, south, east, west, json).await,
        Commands::Regions { counts } => commands::regions::run(&source, counts).await,
    }
}
