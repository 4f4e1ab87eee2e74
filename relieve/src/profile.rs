//! Route elevation profiles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bounds::LatLng;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Largest slope magnitude reported, in percent.
pub const MAX_SLOPE_PERCENT: f64 = 100.0;

/// Great-circle distance in meters between two coordinates.
pub fn haversine_distance(a: LatLng, b: LatLng) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Slope between two samples in percent, clamped to ±100.
///
/// Zero when either elevation is missing or the points coincide.
pub fn slope_percent(previous: Option<f64>, current: Option<f64>, distance: f64) -> f64 {
    match (previous, current) {
        (Some(prev), Some(cur)) if distance > 0.0 => {
            ((cur - prev) / distance * 100.0).clamp(-MAX_SLOPE_PERCENT, MAX_SLOPE_PERCENT)
        }
        _ => 0.0,
    }
}

/// One point of an elevation profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePoint {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
    /// Elevation in meters, if available.
    pub elevation: Option<f64>,
    /// Distance along the route from the first point, in meters.
    pub distance_from_start: f64,
    /// Slope of the segment ending at this point, in percent.
    pub slope_percent: f64,
}

/// Memoization key: the coordinate rounded to six decimals.
fn memo_key(point: LatLng) -> (i64, i64) {
    (
        (point.lat * 1e6).round() as i64,
        (point.lng * 1e6).round() as i64,
    )
}

/// Accumulates a profile one point at a time.
///
/// Tracks the running distance and the previous elevation, and remembers the
/// elevation of every coordinate seen so repeated points are looked up once.
#[derive(Debug, Default)]
pub struct ProfileBuilder {
    points: Vec<ProfilePoint>,
    memo: HashMap<(i64, i64), Option<f64>>,
}

impl ProfileBuilder {
    /// Create a builder for a route of about `capacity` points.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            memo: HashMap::new(),
        }
    }

    /// The elevation already recorded for this coordinate, if any.
    ///
    /// The outer `Option` is the memo lookup; the inner one is the elevation.
    pub fn memoized(&self, point: LatLng) -> Option<Option<f64>> {
        self.memo.get(&memo_key(point)).copied()
    }

    /// Append the next point of the route.
    pub fn push(&mut self, point: LatLng, elevation: Option<f64>) -> &ProfilePoint {
        self.memo.entry(memo_key(point)).or_insert(elevation);

        let (distance_from_start, slope) = match self.points.last() {
            None => (0.0, 0.0),
            Some(prev) => {
                let segment = haversine_distance(LatLng::new(prev.lat, prev.lng), point);
                (
                    prev.distance_from_start + segment,
                    slope_percent(prev.elevation, elevation, segment),
                )
            }
        };

        self.points.push(ProfilePoint {
            lat: point.lat,
            lng: point.lng,
            elevation,
            distance_from_start,
            slope_percent: slope,
        });
        &self.points[self.points.len() - 1]
    }

    /// Number of points so far.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no point has been pushed.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The finished profile, in traversal order.
    pub fn finish(self) -> Vec<ProfilePoint> {
        self.points
    }
}

/// Aggregate figures for a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    /// Lowest elevation, if any point has one.
    pub min: Option<f64>,
    /// Highest elevation, if any point has one.
    pub max: Option<f64>,
    /// Mean of the available elevations.
    pub mean: Option<f64>,
    /// Sum of climbs between successive known elevations, in meters.
    pub total_ascent: f64,
    /// Sum of drops between successive known elevations, in meters.
    pub total_descent: f64,
    /// Route length in meters.
    pub distance: f64,
    /// Number of points.
    pub samples: usize,
    /// Points without an elevation.
    pub missing: usize,
}

impl ProfileSummary {
    /// Summarize a profile.
    pub fn from_points(points: &[ProfilePoint]) -> Self {
        let mut summary = Self {
            samples: points.len(),
            distance: points.last().map_or(0.0, |p| p.distance_from_start),
            ..Default::default()
        };

        let mut sum = 0.0;
        let mut known = 0usize;
        let mut last: Option<f64> = None;

        for elevation in points.iter().map(|p| p.elevation) {
            let Some(e) = elevation else {
                summary.missing += 1;
                continue;
            };

            summary.min = Some(summary.min.map_or(e, |m| m.min(e)));
            summary.max = Some(summary.max.map_or(e, |m| m.max(e)));
            sum += e;
            known += 1;

            if let Some(prev) = last {
                let delta = e - prev;
                if delta > 0.0 {
                    summary.total_ascent += delta;
                } else {
                    summary.total_descent -= delta;
                }
            }
            last = Some(e);
        }

        if known > 0 {
            summary.mean = Some(sum / known as f64);
        }
        summary
    }
}
