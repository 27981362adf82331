//! Raster store: reading composites and writing derived rasters

mod native;

pub use native::{
    read_bands, read_geotiff, write_class_geotiff, write_geotiff, write_multiband, DecodedImage,
};

use crate::composite::{Band, ImageComposite};
use crate::error::Result;
use crate::raster::Raster;
use std::path::Path;

/// Storage boundary for imagery and classification products.
///
/// Workflows depend on this trait rather than on a file format so tests and
/// alternative backends can stand in for GeoTIFF files.
pub trait RasterStore: Send + Sync {
    /// Read a multi-band image, assigning `bands` to the stored bands in order
    fn read_composite(&self, path: &Path, bands: &[Band]) -> Result<ImageComposite>;

    /// Persist a continuous raster (index values, normalized bands)
    fn write_raster(&self, raster: &Raster<f64>, path: &Path) -> Result<()>;

    /// Persist a class-label raster
    fn write_classes(&self, raster: &Raster<u8>, path: &Path) -> Result<()>;
}

/// [`RasterStore`] backed by GeoTIFF files
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffStore;

impl RasterStore for GeoTiffStore {
    fn read_composite(&self, path: &Path, bands: &[Band]) -> Result<ImageComposite> {
        let image = read_bands(path)?;
        ImageComposite::from_stack(image.bands, bands, image.transform, image.crs)
    }

    fn write_raster(&self, raster: &Raster<f64>, path: &Path) -> Result<()> {
        write_geotiff(raster, path)
    }

    fn write_classes(&self, raster: &Raster<u8>, path: &Path) -> Result<()> {
        write_class_geotiff(raster, path)
    }
}
