//! GDAL raster backend (feature `gdal`)
//!
//! Reads the affine geo-transform and spatial reference of GeoTIFFs and
//! reprojects through OGR. Both reference systems are forced into traditional GIS
//! axis order so x stays longitude regardless of the GDAL major version.

use std::path::Path;

use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::Dataset;
use tracing::debug;

use super::{ImageArray, RasterDataset, RasterSource, TransformError, LAT_LON_EPSG_CODE};
use crate::{Error, Result};

/// Raster source backed by GDAL.
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalRasterSource;

impl GdalRasterSource {
    /// Create the backend
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

struct GdalDataset {
    dataset: Dataset,
}

impl RasterDataset for GdalDataset {
    fn geo_transform(&self) -> Option<[f64; 6]> {
        self.dataset.geo_transform().ok()
    }

    fn raster_size(&self) -> (usize, usize) {
        self.dataset.raster_size()
    }

    fn epsg(&self) -> Option<u32> {
        let srs = self.dataset.spatial_ref().ok()?;
        let code = srs.auth_code().ok()?;
        u32::try_from(code).ok()
    }

    fn read_pixels(&self) -> Result<ImageArray> {
        let (width, height) = self.dataset.raster_size();
        let mut bands = Vec::with_capacity(self.dataset.raster_count());
        for index in 1..=self.dataset.raster_count() {
            let band = self
                .dataset
                .rasterband(index)
                .map_err(|e| Error::Raster(format!("band {index}: {e}")))?;
            let buffer = band
                .read_as::<u8>((0, 0), (width, height), (width, height), None)
                .map_err(|e| Error::Raster(format!("band {index}: {e}")))?;
            bands.push(buffer.data().to_vec());
        }
        ImageArray::from_bands(width, height, &bands)
    }
}

impl RasterSource for GdalRasterSource {
    fn open(&self, path: &Path) -> Result<Box<dyn RasterDataset>> {
        let dataset =
            Dataset::open(path).map_err(|e| Error::Raster(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), size = ?dataset.raster_size(), "Opened dataset");
        Ok(Box::new(GdalDataset { dataset }))
    }

    fn transform_to_lat_lon(
        &self,
        epsg: u32,
        xs: &mut [f64],
        ys: &mut [f64],
    ) -> std::result::Result<(), TransformError> {
        let mut source = SpatialRef::from_epsg(epsg).map_err(|_| TransformError::UnknownEpsg)?;
        source.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

        let mut target = SpatialRef::from_epsg(LAT_LON_EPSG_CODE).map_err(|e| {
            TransformError::Failed(format!("failed to import EPSG {LAT_LON_EPSG_CODE}: {e}"))
        })?;
        target.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

        let transform = CoordTransform::new(&source, &target)
            .map_err(|e| TransformError::Failed(e.to_string()))?;
        let mut zs = vec![0.0; xs.len()];
        transform
            .transform_coords(xs, ys, &mut zs)
            .map_err(|e| TransformError::Failed(e.to_string()))
    }
}
