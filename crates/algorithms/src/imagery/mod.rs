//! Imagery analysis
//!
//! - Spectral indices: NDVI, NDWI, NDBI, NDMI, MSI
//! - Region reduction: mean/min/max/std-dev over valid, masked pixels
//! - Change detection: urban, forest and water masks and their areas
//! - Condition summaries: vegetation health and soil moisture labels

mod analysis;
mod change_detection;
mod indices;
mod region;

pub use analysis::{
    analyze_moisture, analyze_vegetation, moisture_rules, vegetation_health_rules,
    MoistureAnalysis, MoistureStatus, VegetationAnalysis, VegetationHealth,
};
pub use change_detection::{
    and_not, detect_forest_change, detect_urban_sprawl, detect_water, forest_mask, mask_area_km2,
    threshold_mask, urban_mask, water_mask, AreaChange, Comparison, ForestChange,
    FOREST_NDVI_THRESHOLD, UrbanSprawl, URBAN_NDBI_THRESHOLD, URBAN_NDVI_CEILING, WaterBodies,
    WATER_NDWI_THRESHOLD,
};
pub use indices::{
    msi, ndbi, ndmi, ndvi, ndwi, normalized_difference, normalized_difference_value, ratio,
    IndexRaster, SpectralIndex, EPSILON,
};
pub use region::{aoi_mask, reduce_region, RegionStats};

use ndarray::Array2;
use terrawatch_core::raster::{Raster, RasterElement};
use terrawatch_core::{Error, Result};

pub(crate) fn is_nodata_f64(value: f64, nodata: Option<f64>) -> bool {
    value.is_nan() || nodata.map_or(false, |nd| (value - nd).abs() < f64::EPSILON)
}

pub(crate) fn check_dimensions<A: RasterElement, B: RasterElement>(
    a: &Raster<A>,
    b: &Raster<B>,
) -> Result<()> {
    a.same_grid(b)
}

pub(crate) fn build_output<T: RasterElement>(
    template: &Raster<f64>,
    rows: usize,
    cols: usize,
    data: Vec<T>,
) -> Result<Raster<T>> {
    let mut output = template.with_same_meta::<T>(rows, cols);
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}
