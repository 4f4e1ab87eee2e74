//! Region guessing for two-level tile indexes.
//!
//! A regional index splits the landmass into named regions (provincias), each
//! with its own sub-index that is only fetched when needed. Picking the right
//! region for a query is a heuristic: the query centroid is matched against
//! region coverage, first from the index document itself and then from a
//! fixed table of latitude/longitude bands. A wrong guess is not fatal, the
//! resolver probes nearby regions afterwards.

use crate::bounds::{Bounds, LatLng};

/// A named latitude/longitude band used to guess the region of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionBand {
    /// Region name as it appears in the index document.
    pub name: String,
    /// Coverage of the band.
    pub bounds: Bounds,
}

impl RegionBand {
    /// Create a new band.
    pub fn new(name: impl Into<String>, bounds: Bounds) -> Self {
        Self {
            name: name.into(),
            bounds,
        }
    }
}

/// The default band table.
///
/// Bands are checked in order and may overlap; the first match wins, so the
/// narrower Cuyo band sits ahead of the Centro band that surrounds it.
///
/// - norte: 21.5°S to 28°S, 68.5°W to 53.5°W
/// - cuyo: 28°S to 37.5°S, 70.5°W to 64.5°W
/// - centro: 28°S to 39°S, 66°W to 56.5°W
/// - patagonia: 36°S to 55.5°S, 73.5°W to 62°W
pub fn default_bands() -> Vec<RegionBand> {
    vec![
        RegionBand::new("norte", Bounds::new(-21.5, -28.0, -53.5, -68.5)),
        RegionBand::new("cuyo", Bounds::new(-28.0, -37.5, -64.5, -70.5)),
        RegionBand::new("centro", Bounds::new(-28.0, -39.0, -56.5, -66.0)),
        RegionBand::new("patagonia", Bounds::new(-36.0, -55.5, -62.0, -73.5)),
    ]
}

/// Return the first band containing the point, if any.
pub fn guess_band(bands: &[RegionBand], point: LatLng) -> Option<&str> {
    bands
        .iter()
        .find(|band| band.bounds.contains_point(point.lat, point.lng))
        .map(|band| band.name.as_str())
}

/// Known coverage of a region: its declared bounds, else its band.
pub fn coverage(name: &str, declared: Option<Bounds>, bands: &[RegionBand]) -> Option<Bounds> {
    declared.or_else(|| {
        bands
            .iter()
            .find(|band| band.name == name)
            .map(|band| band.bounds)
    })
}

/// Order candidate regions for probing.
///
/// `regions` pairs every region name of the index with its declared coverage,
/// if the document has one. The guess comes first: a region whose declared
/// coverage contains the point, else the first matching band. The rest follow
/// in order of increasing distance from `point` to their center (declared
/// coverage, else band). Regions with no known coverage go last, in their
/// original order.
pub fn probe_order(
    regions: &[(String, Option<Bounds>)],
    bands: &[RegionBand],
    point: LatLng,
) -> Vec<String> {
    let guess = regions
        .iter()
        .find(|(_, declared)| matches!(declared, Some(b) if b.contains_point(point.lat, point.lng)))
        .map(|(name, _)| name.as_str())
        .or_else(|| {
            guess_band(bands, point).filter(|name| regions.iter().any(|(r, _)| r.as_str() == *name))
        });

    let mut located: Vec<(f64, &str)> = Vec::new();
    let mut unlocated: Vec<&str> = Vec::new();
    for (name, declared) in regions {
        if Some(name.as_str()) == guess {
            continue;
        }
        match coverage(name, *declared, bands) {
            Some(b) => located.push((squared_distance(point, b.centroid()), name)),
            None => unlocated.push(name),
        }
    }
    located.sort_by(|a, b| a.0.total_cmp(&b.0));

    guess
        .into_iter()
        .chain(located.into_iter().map(|(_, name)| name))
        .chain(unlocated)
        .map(str::to_string)
        .collect()
}

/// Planar squared distance in degrees, good enough for ranking.
fn squared_distance(a: LatLng, b: LatLng) -> f64 {
    let dlat = a.lat - b.lat;
    let dlng = a.lng - b.lng;
    dlat * dlat + dlng * dlng
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<(String, Option<Bounds>)> {
        list.iter().map(|n| (n.to_string(), None)).collect()
    }

    #[test]
    fn test_guess_band() {
        let bands = default_bands();

        assert_eq!(guess_band(&bands, LatLng::new(-34.6, -58.4)), Some("centro")); // Buenos Aires
        assert_eq!(guess_band(&bands, LatLng::new(-32.9, -68.8)), Some("cuyo")); // Mendoza
        assert_eq!(guess_band(&bands, LatLng::new(-24.8, -65.4)), Some("norte")); // Salta
        assert_eq!(guess_band(&bands, LatLng::new(-41.1, -71.3)), Some("patagonia")); // Bariloche
        assert_eq!(guess_band(&bands, LatLng::new(40.0, 0.0)), None);
    }

    #[test]
    fn test_probe_order_guess_first_then_nearest() {
        let regions = names(&["norte", "patagonia", "cuyo", "centro"]);
        let order = probe_order(&regions, &default_bands(), LatLng::new(-34.6, -58.4));

        assert_eq!(order[0], "centro");
        assert_eq!(order.len(), 4);
        // Cuyo's center is closer to Buenos Aires than Patagonia's or Norte's
        assert_eq!(order[1], "cuyo");
    }

    #[test]
    fn test_declared_coverage_beats_band() {
        // The document claims "litoral" covers Buenos Aires
        let regions = vec![
            ("centro".to_string(), None),
            (
                "litoral".to_string(),
                Some(Bounds::new(-30.0, -36.0, -57.0, -61.0)),
            ),
        ];
        let order = probe_order(&regions, &default_bands(), LatLng::new(-34.6, -58.4));
        assert_eq!(order, vec!["litoral", "centro"]);
    }

    #[test]
    fn test_guess_absent_from_document() {
        // Band says centro, but the document has no such region
        let regions = names(&["cuyo", "misiones"]);
        let order = probe_order(&regions, &default_bands(), LatLng::new(-34.6, -58.4));
        assert_eq!(order, vec!["cuyo", "misiones"]);
    }
}
