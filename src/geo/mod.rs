//! Geospatial resolution of plot images
//!
//! Raster decoding and coordinate reference system transforms are provided by a
//! [`RasterSource`]. The resolver only does the geometry:
//!
//! ```text
//! geo-transform + raster size ──> GeoBounds ──> closed ring (5 points)
//!                                                   │
//!                       EPSG (image) ──> transform to EPSG:4326 (lon, lat)
//!                                                   │
//!                                                   └──> polygon centroid ──> LatLon
//! ```
//!
//! Missing geo-referencing or a missing EPSG code is not an error: the image simply
//! has no centroid. An EPSG code that cannot be imported, or a failed transform, is
//! fatal for that image.

mod image_backend;
#[cfg(feature = "gdal")]
mod gdal_backend;

pub use image_backend::ImageRasterSource;
#[cfg(feature = "gdal")]
pub use gdal_backend::GdalRasterSource;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{Error, Result};

/// EPSG code of the latitude/longitude reference system centroids are reported in
pub const LAT_LON_EPSG_CODE: u32 = 4326;

/// Decoded image pixels, band axis last (height x width x channels).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArray {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<u8>,
}

impl ImageArray {
    /// Create an image array from interleaved pixel data.
    ///
    /// # Errors
    ///
    /// Returns error if `data` does not hold exactly `width * height * channels` bytes
    pub fn new(width: usize, height: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        let expected = width * height * channels;
        if data.len() != expected {
            return Err(Error::Raster(format!(
                "pixel buffer holds {} bytes, expected {expected} for {width}x{height}x{channels}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Interleave separate bands (each `width * height` bytes) into one array.
    ///
    /// # Errors
    ///
    /// Returns error if any band has the wrong length
    pub fn from_bands(width: usize, height: usize, bands: &[Vec<u8>]) -> Result<Self> {
        let plane = width * height;
        if let Some(bad) = bands.iter().position(|b| b.len() != plane) {
            return Err(Error::Raster(format!(
                "band {} holds {} bytes, expected {plane}",
                bad + 1,
                bands[bad].len()
            )));
        }
        let mut data = Vec::with_capacity(plane * bands.len());
        for idx in 0..plane {
            data.extend(bands.iter().map(|band| band[idx]));
        }
        Self::new(width, height, bands.len(), data)
    }

    /// Image width in pixels
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Image height in pixels
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Number of channels per pixel
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Raw interleaved pixel data
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Value of one channel of one pixel
    #[must_use]
    pub fn pixel(&self, x: usize, y: usize, channel: usize) -> Option<u8> {
        if x >= self.width || y >= self.height || channel >= self.channels {
            return None;
        }
        self.data
            .get((y * self.width + x) * self.channels + channel)
            .copied()
    }

    /// Mean value of one channel, or `None` for an empty image or unknown channel
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn channel_mean(&self, channel: usize) -> Option<f64> {
        if channel >= self.channels || self.data.is_empty() {
            return None;
        }
        let (sum, count) = self
            .data
            .iter()
            .skip(channel)
            .step_by(self.channels)
            .fold((0u64, 0u64), |(s, c), v| (s + u64::from(*v), c + 1));
        Some(sum as f64 / count as f64)
    }
}

/// Axis-aligned bounds of an image in its native reference system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    /// Minimum y
    pub min_y: f64,
    /// Maximum y
    pub max_y: f64,
    /// Minimum x
    pub min_x: f64,
    /// Maximum x
    pub max_x: f64,
}

impl GeoBounds {
    /// Compute bounds from an affine geo-transform and the raster size.
    ///
    /// Pixel resolution signs vary between rasters, so y and x are ordered
    /// independently.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_transform(transform: &[f64; 6], raster_size: (usize, usize)) -> Self {
        let (width, height) = raster_size;
        let (ulx, xres, uly, yres) = (transform[0], transform[1], transform[3], transform[5]);
        let lrx = ulx + width as f64 * xres;
        let lry = uly + height as f64 * yres;

        Self {
            min_y: uly.min(lry),
            max_y: uly.max(lry),
            min_x: ulx.min(lrx),
            max_x: ulx.max(lrx),
        }
    }

    /// Closed ring around the bounds: UL, UR, LR, LL and UL again.
    #[must_use]
    pub const fn ring(&self) -> ([f64; 5], [f64; 5]) {
        (
            [self.min_x, self.max_x, self.max_x, self.min_x, self.min_x],
            [self.max_y, self.max_y, self.min_y, self.min_y, self.max_y],
        )
    }
}

/// A point in EPSG:4326.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
}

/// Failure of a coordinate transform requested from a [`RasterSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// The source EPSG code could not be imported
    UnknownEpsg,
    /// The transform could not be built or applied
    Failed(String),
}

/// An opened raster.
pub trait RasterDataset {
    /// Affine geo-transform `[ulx, xres, xrot, uly, yrot, yres]`, if geo-referenced.
    fn geo_transform(&self) -> Option<[f64; 6]>;

    /// Raster size as (width, height).
    fn raster_size(&self) -> (usize, usize);

    /// Authority code of the raster's spatial reference, if any.
    fn epsg(&self) -> Option<u32>;

    /// Decode all bands.
    ///
    /// # Errors
    ///
    /// Returns error if the pixels cannot be read
    fn read_pixels(&self) -> Result<ImageArray>;
}

/// Raster decoding and coordinate transformation backend.
pub trait RasterSource {
    /// Open a raster file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened as a raster
    fn open(&self, path: &Path) -> Result<Box<dyn RasterDataset>>;

    /// Transform points in place from `epsg` into EPSG:4326, traditional GIS
    /// order (x = longitude, y = latitude).
    ///
    /// # Errors
    ///
    /// [`TransformError::UnknownEpsg`] if `epsg` cannot be imported,
    /// [`TransformError::Failed`] for any other transform failure
    fn transform_to_lat_lon(
        &self,
        epsg: u32,
        xs: &mut [f64],
        ys: &mut [f64],
    ) -> std::result::Result<(), TransformError>;
}

/// Resolves bounds, EPSG codes and centroids of image files.
pub struct GeoResolver<'a> {
    source: &'a dyn RasterSource,
}

impl<'a> GeoResolver<'a> {
    /// Create a resolver on top of a raster backend.
    #[must_use]
    pub fn new(source: &'a dyn RasterSource) -> Self {
        Self { source }
    }

    /// Bounds of the image, or `None` if it cannot be opened or is not geo-referenced.
    #[must_use]
    pub fn geobounds(&self, path: &Path) -> Option<GeoBounds> {
        match self.source.open(path) {
            Ok(dataset) => bounds_of(dataset.as_ref(), path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unable to open file for bounds");
                None
            }
        }
    }

    /// EPSG code of the image, or `None` if it cannot be determined.
    #[must_use]
    pub fn epsg(&self, path: &Path) -> Option<u32> {
        match self.source.open(path) {
            Ok(dataset) => dataset.epsg(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unable to open file for EPSG");
                None
            }
        }
    }

    /// Centroid of the image footprint in EPSG:4326.
    ///
    /// Returns `Ok(None)` when the image is not geo-referenced or has no EPSG code.
    ///
    /// # Errors
    ///
    /// [`Error::EpsgImport`] if the image's EPSG code cannot be imported,
    /// [`Error::Transform`] if the transform fails
    pub fn centroid(&self, path: &Path) -> Result<Option<LatLon>> {
        let dataset = match self.source.open(path) {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unable to open file for centroid");
                return Ok(None);
            }
        };

        let Some(bounds) = bounds_of(dataset.as_ref(), path) else {
            info!(path = %path.display(), "File is not a geo-referenced image file");
            return Ok(None);
        };

        let Some(epsg) = dataset.epsg() else {
            info!(path = %path.display(), "EPSG is not found in image file");
            return Ok(None);
        };

        // EPSG:4326 still goes through the backend, which fixes the axis order.
        let (mut xs, mut ys) = bounds.ring();
        self.source
            .transform_to_lat_lon(epsg, &mut xs, &mut ys)
            .map_err(|e| match e {
                TransformError::UnknownEpsg => {
                    error!(epsg, path = %path.display(), "Failed to import EPSG");
                    Error::EpsgImport {
                        epsg,
                        path: path.to_path_buf(),
                    }
                }
                TransformError::Failed(msg) => {
                    error!(
                        path = %path.display(),
                        error = %msg,
                        "Failed to transform file polygon to lat-lon"
                    );
                    Error::Transform(format!("{}: {msg}", path.display()))
                }
            })?;

        let (lon, lat) = polygon_centroid(&xs, &ys)
            .ok_or_else(|| Error::Transform(format!("{}: degenerate footprint", path.display())))?;
        Ok(Some(LatLon { lat, lon }))
    }
}

fn bounds_of(dataset: &dyn RasterDataset, path: &Path) -> Option<GeoBounds> {
    let Some(transform) = dataset.geo_transform() else {
        warn!(path = %path.display(), "No geo-transform found in file");
        return None;
    };
    let bounds = GeoBounds::from_transform(&transform, dataset.raster_size());
    let finite = [bounds.min_y, bounds.max_y, bounds.min_x, bounds.max_x]
        .iter()
        .all(|v| v.is_finite());
    finite.then_some(bounds)
}

/// Area-weighted centroid of a closed ring, as (x, y).
///
/// Vertices are taken relative to the first one so plot-sized footprints at
/// real coordinates keep their precision. A ring with no area falls back to the
/// mean of its distinct vertices.
#[must_use]
pub fn polygon_centroid(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    let n = xs.len().min(ys.len());
    if n < 2 || xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
        return None;
    }

    let (x0, y0) = (xs[0], ys[0]);
    let dx: Vec<f64> = xs[..n].iter().map(|x| x - x0).collect();
    let dy: Vec<f64> = ys[..n].iter().map(|y| y - y0).collect();

    let (mut area2, mut cx, mut cy) = (0.0, 0.0, 0.0);
    for i in 0..n - 1 {
        let cross = dx[i] * dy[i + 1] - dx[i + 1] * dy[i];
        area2 += cross;
        cx += (dx[i] + dx[i + 1]) * cross;
        cy += (dy[i] + dy[i + 1]) * cross;
    }

    if area2.abs() < f64::MIN_POSITIVE {
        #[allow(clippy::cast_precision_loss)]
        let count = (n - 1) as f64;
        let sx: f64 = dx[..n - 1].iter().sum();
        let sy: f64 = dy[..n - 1].iter().sum();
        return Some((x0 + sx / count, y0 + sy / count));
    }

    Some((x0 + cx / (3.0 * area2), y0 + cy / (3.0 * area2)))
}
