//! Geographic value types: points and bounding boxes.

use serde::{Deserialize, Serialize};

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude (positive north).
    pub lat: f64,
    /// Longitude (positive east).
    pub lng: f64,
}

impl LatLng {
    /// Create a new coordinate.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check that latitude is within ±90° and longitude within ±180°.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

impl From<(f64, f64)> for LatLng {
    fn from((lat, lng): (f64, f64)) -> Self {
        Self { lat, lng }
    }
}

/// A geographic bounding box.
///
/// Coordinates are in decimal degrees (WGS84). The field names match the
/// index document format, so a `Bounds` deserializes straight from
/// `{"north": .., "south": .., "east": .., "west": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Northern boundary latitude.
    pub north: f64,
    /// Southern boundary latitude.
    pub south: f64,
    /// Eastern boundary longitude.
    pub east: f64,
    /// Western boundary longitude.
    pub west: f64,
}

impl Bounds {
    /// Create a new bounding box.
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    /// A degenerate box collapsed onto a single point.
    pub fn point(lat: f64, lng: f64) -> Self {
        Self::new(lat, lat, lng, lng)
    }

    /// Whether both corners are valid coordinates and the box is not inverted.
    pub fn is_valid(&self) -> bool {
        LatLng::new(self.north, self.east).is_valid()
            && LatLng::new(self.south, self.west).is_valid()
            && self.north >= self.south
            && self.east >= self.west
    }

    /// Whether `inner` lies entirely within this box (edges inclusive).
    pub fn contains_bounds(&self, inner: &Bounds) -> bool {
        self.north >= inner.north
            && self.south <= inner.south
            && self.east >= inner.east
            && self.west <= inner.west
    }

    /// Whether the point lies within this box (edges inclusive).
    pub fn contains_point(&self, lat: f64, lng: f64) -> bool {
        self.contains_bounds(&Bounds::point(lat, lng))
    }

    /// Whether the two boxes share any area or edge.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.south <= other.north
            && self.north >= other.south
            && self.west <= other.east
            && self.east >= other.west
    }

    /// The center of the box.
    pub fn centroid(&self) -> LatLng {
        LatLng::new(
            (self.north + self.south) / 2.0,
            (self.east + self.west) / 2.0,
        )
    }
}
