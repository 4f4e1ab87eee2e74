//! Tile index documents.
//!
//! An index maps tile identifiers to their geographic coverage and to the
//! place where the raster is stored. Two shapes are accepted:
//!
//! - **Flat**: `{"tiles": {"<id>": IndexEntry, ...}}`
//! - **Regional**: `{"provincias": {"<region>": {...}, ...}}`, where every
//!   region resolves, once fetched, to a flat `{"tiles": {...}}` sub-index.
//!
//! A region value may be an object with any of `index` (path of its
//! sub-index), `bounds` (coverage used for region guessing) and `tiles`
//! (an inline tile map), or simply a string holding the sub-index path.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bounds::Bounds;
use crate::error::{Result, TerrainError};

/// One tile's coverage and storage location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// Tile identifier (the key of the entry in its tile map).
    #[serde(default)]
    pub id: String,
    /// Member name inside the archive, or payload path when there is no archive.
    pub filename: String,
    /// Geographic coverage of the tile.
    pub bounds: Bounds,
    /// Region the tile was registered under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Archive holding `filename`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_file: Option<String>,
}

impl IndexEntry {
    /// Path of the payload to fetch: the archive if there is one, else the raster itself.
    pub fn payload_path(&self) -> &str {
        self.archive_file.as_deref().unwrap_or(&self.filename)
    }
}

/// An ordered set of tiles from one index tier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileSet {
    entries: Vec<IndexEntry>,
}

impl TileSet {
    /// Build a tile set from a JSON tile map, keeping document order.
    ///
    /// Entries that fail to parse or have invalid bounds are dropped with a
    /// warning. Entries without a region inherit `region`.
    pub fn from_map(map: Map<String, Value>, region: Option<&str>) -> Self {
        let mut entries = Vec::with_capacity(map.len());

        for (id, value) in map {
            let mut entry: IndexEntry = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(tile = %id, error = %e, "Skipping malformed index entry");
                    continue;
                }
            };

            if !entry.bounds.is_valid() {
                tracing::warn!(tile = %id, bounds = ?entry.bounds, "Skipping index entry with invalid bounds");
                continue;
            }

            entry.id = id;
            if entry.region.is_none() {
                entry.region = region.map(str::to_string);
            }
            entries.push(entry);
        }

        Self { entries }
    }

    /// Return the first entry whose bounds fully contain `bounds`.
    pub fn find(&self, bounds: &Bounds) -> Option<&IndexEntry> {
        self.entries
            .iter()
            .find(|entry| entry.bounds.contains_bounds(bounds))
    }

    /// All entries in document order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A region of a two-level index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionRef {
    /// Region name.
    pub name: String,
    /// Path of the region's sub-index, if the document names one.
    pub index: Option<String>,
    /// Declared region coverage.
    pub bounds: Option<Bounds>,
    /// Tiles listed inline in the global document.
    pub tiles: Option<TileSet>,
}

#[derive(Deserialize, Default)]
struct RawRegion {
    #[serde(default)]
    index: Option<String>,
    #[serde(default)]
    bounds: Option<Bounds>,
    #[serde(default)]
    tiles: Option<Map<String, Value>>,
}

impl RegionRef {
    fn from_value(name: String, value: Value) -> Self {
        let raw = match value {
            Value::String(index) => RawRegion {
                index: Some(index),
                ..Default::default()
            },
            object @ Value::Object(_) => serde_json::from_value(object).unwrap_or_else(|e| {
                tracing::warn!(region = %name, error = %e, "Ignoring malformed region fields");
                RawRegion::default()
            }),
            _ => RawRegion::default(),
        };

        let bounds = raw.bounds.filter(Bounds::is_valid);
        let tiles = raw.tiles.map(|map| TileSet::from_map(map, Some(&name)));

        Self {
            name,
            index: raw.index,
            bounds,
            tiles,
        }
    }
}

/// A parsed and validated global index document.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexDocument {
    /// A single tile map.
    Flat(TileSet),
    /// Named regions whose tile maps are loaded lazily.
    Regional(Vec<RegionRef>),
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    provincias: Option<Map<String, Value>>,
    #[serde(default)]
    tiles: Option<Map<String, Value>>,
}

impl IndexDocument {
    /// Parse a global index document.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::IndexFormat`] if the bytes are not JSON, or the
    /// document has neither a non-empty `provincias` map nor a `tiles` map.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawDocument =
            serde_json::from_slice(bytes).map_err(|e| TerrainError::IndexFormat(e.to_string()))?;

        if let Some(provincias) = raw.provincias {
            if provincias.is_empty() {
                return Err(TerrainError::IndexFormat(
                    "`provincias` lists no regions".to_string(),
                ));
            }
            let regions = provincias
                .into_iter()
                .map(|(name, value)| RegionRef::from_value(name, value))
                .collect();
            return Ok(IndexDocument::Regional(regions));
        }

        match raw.tiles {
            Some(tiles) => Ok(IndexDocument::Flat(TileSet::from_map(tiles, None))),
            None => Err(TerrainError::IndexFormat(
                "expected a `provincias` or `tiles` map".to_string(),
            )),
        }
    }
}

/// Parse a region sub-index (`{"tiles": {...}}`).
pub fn parse_region_index(bytes: &[u8], region: &str) -> Result<TileSet> {
    let raw: RawDocument =
        serde_json::from_slice(bytes).map_err(|e| TerrainError::IndexFormat(e.to_string()))?;

    raw.tiles
        .map(|tiles| TileSet::from_map(tiles, Some(region)))
        .ok_or_else(|| {
            TerrainError::IndexFormat(format!("region index for {} has no `tiles` map", region))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAT: &str = r#"{
        "tiles": {
            "tile_2": {
                "filename": "tile_2.tif",
                "bounds": {"north": -33, "south": -34, "east": -58, "west": -59},
                "archiveFile": "centro_01.tar"
            },
            "tile_1": {
                "filename": "tile_1.tif",
                "bounds": {"north": -34, "south": -35, "east": -58, "west": -59},
                "archiveFile": "centro_01.tar",
                "region": "centro"
            }
        }
    }"#;

    #[test]
    fn test_parse_flat() {
        let doc = IndexDocument::parse(FLAT.as_bytes()).unwrap();
        let IndexDocument::Flat(tiles) = doc else {
            panic!("Expected flat index");
        };

        assert_eq!(tiles.len(), 2);
        // Document order is preserved, not key order
        assert_eq!(tiles.entries()[0].id, "tile_2");
        assert_eq!(tiles.entries()[1].id, "tile_1");
        assert_eq!(tiles.entries()[1].archive_file.as_deref(), Some("centro_01.tar"));
        assert_eq!(tiles.entries()[1].region.as_deref(), Some("centro"));
        assert_eq!(tiles.entries()[0].region, None);
    }

    #[test]
    fn test_find_containing_entry() {
        let IndexDocument::Flat(tiles) = IndexDocument::parse(FLAT.as_bytes()).unwrap() else {
            panic!("Expected flat index");
        };

        let hit = tiles.find(&Bounds::point(-34.6, -58.4)).unwrap();
        assert_eq!(hit.id, "tile_1");

        let hit = tiles.find(&Bounds::point(-33.5, -58.5)).unwrap();
        assert_eq!(hit.id, "tile_2");

        // Straddles both tiles: neither contains it fully
        assert!(tiles.find(&Bounds::new(-33.5, -34.5, -58.2, -58.8)).is_none());

        // Nowhere near
        assert!(tiles.find(&Bounds::point(10.0, 10.0)).is_none());
    }

    #[test]
    fn test_parse_regional() {
        let json = r#"{
            "provincias": {
                "centro": {"index": "indices/centro.json",
                           "bounds": {"north": -30, "south": -38, "east": -57, "west": -65}},
                "cuyo": "indices/cuyo.json",
                "norte": {"tiles": {"n1": {"filename": "n1.tif",
                    "bounds": {"north": -22, "south": -23, "east": -65, "west": -66}}}},
                "patagonia": {}
            }
        }"#;
        let IndexDocument::Regional(regions) = IndexDocument::parse(json.as_bytes()).unwrap()
        else {
            panic!("Expected regional index");
        };

        assert_eq!(regions.len(), 4);
        assert_eq!(regions[0].name, "centro");
        assert_eq!(regions[0].index.as_deref(), Some("indices/centro.json"));
        assert!(regions[0].bounds.is_some());
        assert_eq!(regions[1].index.as_deref(), Some("indices/cuyo.json"));

        let inline = regions[2].tiles.as_ref().unwrap();
        assert_eq!(inline.len(), 1);
        assert_eq!(inline.entries()[0].region.as_deref(), Some("norte"));

        assert_eq!(regions[3].index, None);
        assert_eq!(regions[3].tiles, None);
    }

    #[test]
    fn test_invalid_entries_are_dropped() {
        let json = r#"{"tiles": {
            "inverted": {"filename": "a.tif", "bounds": {"north": -35, "south": -34, "east": -58, "west": -59}},
            "no_bounds": {"filename": "b.tif"},
            "ok": {"filename": "c.tif", "bounds": {"north": -34, "south": -35, "east": -58, "west": -59}}
        }}"#;
        let IndexDocument::Flat(tiles) = IndexDocument::parse(json.as_bytes()).unwrap() else {
            panic!("Expected flat index");
        };
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles.entries()[0].id, "ok");
    }

    #[test]
    fn test_rejects_unknown_shapes() {
        assert!(matches!(
            IndexDocument::parse(br#"{"features": []}"#),
            Err(TerrainError::IndexFormat(_))
        ));
        assert!(matches!(
            IndexDocument::parse(br#"{"provincias": {}}"#),
            Err(TerrainError::IndexFormat(_))
        ));
        assert!(matches!(
            IndexDocument::parse(b"<html>not json</html>"),
            Err(TerrainError::IndexFormat(_))
        ));
    }

    #[test]
    fn test_region_index_inherits_region() {
        let json = r#"{"tiles": {"tile_1": {"filename": "tile_1.tif",
            "bounds": {"north": -34, "south": -35, "east": -58, "west": -59},
            "archiveFile": "centro_01.tar"}}}"#;
        let tiles = parse_region_index(json.as_bytes(), "centro").unwrap();
        assert_eq!(tiles.entries()[0].region.as_deref(), Some("centro"));
        assert_eq!(tiles.entries()[0].payload_path(), "centro_01.tar");

        assert!(parse_region_index(br#"{"provincias": {"x": {}}}"#, "centro").is_err());
    }
}
