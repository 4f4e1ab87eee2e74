pub mod profile;
pub mod query;
pub mod regions;
pub mod tile;

use anyhow::{bail, Context, Result};
use relieve::{ElevationPipeline, ElevationPipelineBuilder};
use std::path::PathBuf;

/// Where the tile bundles live, from global options or the environment.
pub struct Source {
    pub base_urls: Vec<String>,
    pub data_dirs: Vec<PathBuf>,
    pub index_paths: Vec<String>,
    pub cache_size: u64,
}

impl Source {
    /// Build the pipeline. Local directories are tried before base URLs.
    pub fn pipeline(&self) -> Result<ElevationPipeline> {
        if self.base_urls.is_empty() && self.data_dirs.is_empty() {
            bail!(
                "No data source. Use --data-dir / --base-url or set RELIEVE_DATA_DIRS / RELIEVE_BASE_URLS"
            );
        }

        let mut builder = ElevationPipelineBuilder::new().archive_cache_size(self.cache_size);
        for dir in &self.data_dirs {
            builder = builder.data_dir(dir);
        }
        for url in &self.base_urls {
            builder = builder.base_url(url);
        }
        if !self.index_paths.is_empty() {
            builder = builder.index_paths(&self.index_paths);
        }

        builder.build().context("Failed to create elevation pipeline")
    }
}
