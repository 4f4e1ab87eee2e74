//! Elevation sampling with anomaly correction.
//!
//! A lookup maps the coordinate onto the nearest pixel and checks it against
//! its 3×3 neighborhood before returning it:
//!
//! - **Hard anomaly**: the value is outside the plausible domain
//!   (default −500 m to 7000 m). It is replaced by the mean of the in-domain
//!   neighbors, or dropped if there are none.
//! - **Soft anomaly**: the value is plausible but deviates from the neighbor
//!   mean by more than the threshold (default 50 m). With enough in-domain
//!   neighbors (default 4) it is replaced by their mean, otherwise dropped.
//!
//! A pixel without any in-domain neighbor has nothing to be compared against
//! and is returned as-is. Returned values are rounded to two decimals.

use crate::raster::RasterTile;

/// Thresholds for anomaly detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyPolicy {
    /// Lowest plausible elevation in meters.
    pub min_elevation: f64,
    /// Highest plausible elevation in meters.
    pub max_elevation: f64,
    /// Largest accepted deviation from the neighbor mean, in meters.
    pub max_deviation: f64,
    /// Neighbors required before a soft anomaly is corrected rather than dropped.
    pub min_neighbors: usize,
}

impl Default for AnomalyPolicy {
    fn default() -> Self {
        Self {
            min_elevation: -500.0,
            max_elevation: 7000.0,
            max_deviation: 50.0,
            min_neighbors: 4,
        }
    }
}

impl AnomalyPolicy {
    /// Whether `value` is a finite elevation inside the plausible domain.
    pub fn in_domain(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min_elevation && value <= self.max_elevation
    }
}

/// Samples elevations from decoded rasters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElevationSampler {
    policy: AnomalyPolicy,
}

impl ElevationSampler {
    /// Create a sampler with the given thresholds.
    pub fn new(policy: AnomalyPolicy) -> Self {
        Self { policy }
    }

    /// The thresholds in use.
    pub fn policy(&self) -> &AnomalyPolicy {
        &self.policy
    }

    /// Map a coordinate to the nearest pixel `(x, y)` of `tile`.
    pub fn pixel(&self, tile: &RasterTile, lat: f64, lng: f64) -> Option<(usize, usize)> {
        let x = ((lng - tile.origin_x) / tile.pixel_scale_x).round();
        let y = ((tile.origin_y - lat) / tile.pixel_scale_y).round();

        if x.is_nan() || y.is_nan() || x < 0.0 || y < 0.0 {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        (x < tile.width && y < tile.height).then_some((x, y))
    }

    /// Sample the elevation at a coordinate.
    ///
    /// Returns `None` outside the raster, on no-data pixels, and for
    /// anomalies that cannot be corrected.
    pub fn sample(&self, tile: &RasterTile, lat: f64, lng: f64) -> Option<f64> {
        let (x, y) = self.pixel(tile, lat, lng)?;
        self.sample_pixel(tile, x, y)
    }

    /// Sample pixel `(x, y)` with anomaly correction.
    pub fn sample_pixel(&self, tile: &RasterTile, x: usize, y: usize) -> Option<f64> {
        let raw = f64::from(tile.get(x, y)?);
        if raw.is_nan() {
            return None;
        }

        let (sum, count) = neighbors(tile, x, y)
            .map(f64::from)
            .filter(|v| self.policy.in_domain(*v))
            .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
        let mean = (count > 0).then(|| sum / count as f64);

        if !self.policy.in_domain(raw) {
            tracing::trace!(x, y, raw, ?mean, "Out-of-domain sample");
            return mean.map(round2);
        }

        let Some(mean) = mean else {
            return Some(round2(raw));
        };

        if (raw - mean).abs() <= self.policy.max_deviation {
            return Some(round2(raw));
        }

        if count >= self.policy.min_neighbors {
            tracing::trace!(x, y, raw, mean, "Corrected deviating sample");
            Some(round2(mean))
        } else {
            tracing::trace!(x, y, raw, mean, count, "Dropped deviating sample with too few neighbors");
            None
        }
    }
}

/// The up-to-8 samples surrounding `(x, y)`.
fn neighbors(tile: &RasterTile, x: usize, y: usize) -> impl Iterator<Item = f32> + '_ {
    (-1isize..=1)
        .flat_map(|dy| (-1isize..=1).map(move |dx| (dx, dy)))
        .filter(|&(dx, dy)| dx != 0 || dy != 0)
        .filter_map(move |(dx, dy)| {
            let nx = x.checked_add_signed(dx)?;
            let ny = y.checked_add_signed(dy)?;
            tile.get(nx, ny)
        })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
