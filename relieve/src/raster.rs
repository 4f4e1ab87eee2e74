//! GeoTIFF raster decoding.

use std::io::Cursor;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

use crate::bounds::Bounds;
use crate::error::{Result, TerrainError};

/// ModelPixelScale: `[scale_x, scale_y, scale_z]`.
const MODEL_PIXEL_SCALE: u16 = 33550;
/// ModelTiepoint: `[i, j, k, x, y, z]`.
const MODEL_TIEPOINT: u16 = 33922;
/// GDAL_NODATA, stored as an ASCII number.
const GDAL_NODATA: u16 = 42113;

/// Decoder buffer limit; large enough for a full-resolution 1° tile.
const BUFFER_LIMIT: usize = 512 * 1024 * 1024;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// A decoded elevation grid with its georeferencing.
///
/// Row 0 is the northern edge, column 0 the western edge. Pixels holding the
/// no-data value decode to NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    /// Row-major samples, `width * height` long.
    pub data: Vec<f32>,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Longitude of the western edge of column 0.
    pub origin_x: f64,
    /// Latitude of the northern edge of row 0.
    pub origin_y: f64,
    /// Degrees of longitude per pixel.
    pub pixel_scale_x: f64,
    /// Degrees of latitude per pixel.
    pub pixel_scale_y: f64,
    /// Raw no-data value declared by the file, if any.
    pub no_data: Option<f32>,
}

impl RasterTile {
    /// Decode a single-band GeoTIFF.
    ///
    /// Every sample type is widened to `f32`.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::Tiff`] if the TIFF itself is unreadable and
    /// [`TerrainError::InvalidGeoTiff`] if georeferencing is missing or the
    /// image is not a single band.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut limits = Limits::default();
        limits.decoding_buffer_size = BUFFER_LIMIT;
        limits.intermediate_buffer_size = BUFFER_LIMIT;
        limits.ifd_value_size = BUFFER_LIMIT;

        let mut decoder = Decoder::new(Cursor::new(bytes))?.with_limits(limits);
        let (width, height) = decoder.dimensions()?;
        let (width, height) = (width as usize, height as usize);

        let tiepoint = decoder
            .get_tag_f64_vec(tag(MODEL_TIEPOINT))
            .map_err(|_| TerrainError::InvalidGeoTiff("missing ModelTiepoint tag".to_string()))?;
        let scale = decoder
            .get_tag_f64_vec(tag(MODEL_PIXEL_SCALE))
            .map_err(|_| TerrainError::InvalidGeoTiff("missing ModelPixelScale tag".to_string()))?;

        if tiepoint.len() < 6 || scale.len() < 2 {
            return Err(TerrainError::InvalidGeoTiff(format!(
                "short georeferencing tags (tiepoint {}, scale {})",
                tiepoint.len(),
                scale.len()
            )));
        }

        let (pixel_scale_x, pixel_scale_y) = (scale[0], scale[1]);
        if !(pixel_scale_x.is_finite() && pixel_scale_x > 0.0)
            || !(pixel_scale_y.is_finite() && pixel_scale_y > 0.0)
        {
            return Err(TerrainError::InvalidGeoTiff(format!(
                "pixel scale must be positive, got ({}, {})",
                pixel_scale_x, pixel_scale_y
            )));
        }

        // Tie pixel (i, j) to model point (x, y), then walk back to pixel (0, 0)
        let origin_x = tiepoint[3] - tiepoint[0] * pixel_scale_x;
        let origin_y = tiepoint[4] + tiepoint[1] * pixel_scale_y;

        let no_data = decoder
            .get_tag_ascii_string(tag(GDAL_NODATA))
            .ok()
            .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok());

        let mut data = widen(decoder.read_image()?);
        if data.len() != width * height {
            return Err(TerrainError::InvalidGeoTiff(format!(
                "expected a single band of {}x{} samples, got {}",
                width,
                height,
                data.len()
            )));
        }

        if let Some(nd) = no_data {
            for v in data.iter_mut().filter(|v| **v == nd) {
                *v = f32::NAN;
            }
        }

        Ok(Self {
            data,
            width,
            height,
            origin_x,
            origin_y,
            pixel_scale_x,
            pixel_scale_y,
            no_data,
        })
    }

    /// The sample at column `x`, row `y`, or `None` outside the grid.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x < self.width && y < self.height {
            self.data.get(y * self.width + x).copied()
        } else {
            None
        }
    }

    /// Geographic coverage of the grid.
    pub fn bounds(&self) -> Bounds {
        Bounds::new(
            self.origin_y,
            self.origin_y - self.height as f64 * self.pixel_scale_y,
            self.origin_x + self.width as f64 * self.pixel_scale_x,
            self.origin_x,
        )
    }
}

fn widen(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
    }
}

/// Test helpers for writing synthetic GeoTIFFs.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use tiff::encoder::{colortype, TiffEncoder};

    /// Encode a `Gray32Float` GeoTIFF with the given tie-point origin and scale.
    pub(crate) fn geotiff_f32(
        width: u32,
        height: u32,
        data: &[f32],
        origin: (f64, f64),
        scale: f64,
        no_data: Option<&str>,
    ) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buf).unwrap();
            let mut image = encoder
                .new_image::<colortype::Gray32Float>(width, height)
                .unwrap();
            image
                .encoder()
                .write_tag(tag(MODEL_PIXEL_SCALE), &[scale, scale, 0.0][..])
                .unwrap();
            image
                .encoder()
                .write_tag(
                    tag(MODEL_TIEPOINT),
                    &[0.0, 0.0, 0.0, origin.0, origin.1, 0.0][..],
                )
                .unwrap();
            if let Some(nd) = no_data {
                image.encoder().write_tag(tag(GDAL_NODATA), nd).unwrap();
            }
            image.write_data(data).unwrap();
        }
        buf.into_inner()
    }
}
