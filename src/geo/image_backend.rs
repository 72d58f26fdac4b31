//! Pure-Rust raster backend built on the `image` crate
//!
//! Decodes JPEG, PNG and TIFF pixels but reads no geo-referencing, so every image
//! opened here resolves to "no centroid". Only EPSG:4326 is understood by the
//! transform, as the identity.

use std::path::{Path, PathBuf};

use super::{ImageArray, RasterDataset, RasterSource, TransformError, LAT_LON_EPSG_CODE};
use crate::{Error, Result};

/// Raster source decoding plain images.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRasterSource;

impl ImageRasterSource {
    /// Create the backend
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

struct ImageDataset {
    path: PathBuf,
    size: (usize, usize),
}

impl RasterDataset for ImageDataset {
    fn geo_transform(&self) -> Option<[f64; 6]> {
        None
    }

    fn raster_size(&self) -> (usize, usize) {
        self.size
    }

    fn epsg(&self) -> Option<u32> {
        None
    }

    fn read_pixels(&self) -> Result<ImageArray> {
        let decoded = image::open(&self.path)?;
        let (width, height) = (decoded.width() as usize, decoded.height() as usize);
        let (channels, data) = if decoded.color().has_alpha() {
            (4, decoded.to_rgba8().into_raw())
        } else {
            (3, decoded.to_rgb8().into_raw())
        };
        ImageArray::new(width, height, channels, data)
    }
}

impl RasterSource for ImageRasterSource {
    fn open(&self, path: &Path) -> Result<Box<dyn RasterDataset>> {
        let (width, height) = image::image_dimensions(path)
            .map_err(|e| Error::Raster(format!("{}: {e}", path.display())))?;
        Ok(Box::new(ImageDataset {
            path: path.to_path_buf(),
            size: (width as usize, height as usize),
        }))
    }

    fn transform_to_lat_lon(
        &self,
        epsg: u32,
        _xs: &mut [f64],
        _ys: &mut [f64],
    ) -> std::result::Result<(), TransformError> {
        if epsg == LAT_LON_EPSG_CODE {
            Ok(())
        } else {
            Err(TransformError::UnknownEpsg)
        }
    }
}
