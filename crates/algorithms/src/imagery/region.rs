//! Region reductions over index rasters

use super::{check_dimensions, is_nodata_f64};
use serde::{Deserialize, Serialize};
use terrawatch_core::raster::Raster;
use terrawatch_core::{AreaOfInterest, Result};

/// Summary statistics of the valid pixels in a region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub count: usize,
}

/// Reduce `raster` over the pixels where `mask` is non-zero (all pixels when `None`).
///
/// NaN and no-data pixels are skipped. Returns `None` when nothing valid remains.
pub fn reduce_region(raster: &Raster<f64>, mask: Option<&Raster<u8>>) -> Result<Option<RegionStats>> {
    if let Some(mask) = mask {
        check_dimensions(raster, mask)?;
    }

    let nodata = raster.nodata();
    let mut count = 0usize;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for ((row, col), &v) in raster.data().indexed_iter() {
        if is_nodata_f64(v, nodata) {
            continue;
        }
        if let Some(mask) = mask {
            if mask.data()[(row, col)] == 0 {
                continue;
            }
        }
        // Welford update
        count += 1;
        let delta = v - mean;
        mean += delta / count as f64;
        m2 += delta * (v - mean);
        min = min.min(v);
        max = max.max(v);
    }

    if count == 0 {
        return Ok(None);
    }
    Ok(Some(RegionStats {
        mean,
        min,
        max,
        std_dev: (m2 / count as f64).sqrt(),
        count,
    }))
}

/// 1 where the pixel centre falls inside `aoi`, 0 elsewhere.
///
/// Assumes the raster is georeferenced in longitude/latitude.
pub fn aoi_mask(template: &Raster<f64>, aoi: &AreaOfInterest) -> Raster<u8> {
    let (rows, cols) = template.shape();
    let mut mask = template.with_same_meta::<u8>(rows, cols);
    for ((row, col), cell) in mask.data_mut().indexed_iter_mut() {
        let (lon, lat) = template.pixel_to_geo(col, row);
        *cell = u8::from(aoi.contains(lon, lat));
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use terrawatch_core::GeoTransform;

    fn raster(values: Vec<f64>, rows: usize, cols: usize) -> Raster<f64> {
        let mut r = Raster::from_vec(values, rows, cols).unwrap();
        r.set_transform(GeoTransform::new(10.0, 50.0, 0.1, -0.1));
        r
    }

    #[test]
    fn test_reduce_all_pixels() {
        let r = raster(vec![0.2, 0.4, 0.6, 0.8], 2, 2);
        let stats = reduce_region(&r, None).unwrap().unwrap();
        assert_relative_eq!(stats.mean, 0.5, epsilon = 1e-12);
        assert_relative_eq!(stats.min, 0.2);
        assert_relative_eq!(stats.max, 0.8);
        assert_relative_eq!(stats.std_dev, 0.05f64.sqrt(), epsilon = 1e-12);
        assert_eq!(stats.count, 4);
    }

    #[test]
    fn test_mask_and_nan_are_skipped() {
        let r = raster(vec![0.2, f64::NAN, 0.6, 0.8], 2, 2);
        let mut mask = r.with_same_meta::<u8>(2, 2);
        mask.set(0, 0, 1).unwrap();
        mask.set(0, 1, 1).unwrap();
        mask.set(1, 0, 1).unwrap();

        let stats = reduce_region(&r, Some(&mask)).unwrap().unwrap();
        assert_eq!(stats.count, 2);
        assert_relative_eq!(stats.mean, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_region() {
        let r = raster(vec![f64::NAN; 4], 2, 2);
        assert!(reduce_region(&r, None).unwrap().is_none());
    }

    #[test]
    fn test_aoi_mask() {
        let r = raster(vec![0.0; 9], 3, 3);
        // centres at lon 10.05/10.15/10.25, lat 49.95/49.85/49.75
        let aoi = AreaOfInterest::new(50.0, 49.8, 10.2, 10.0).unwrap();
        let mask = aoi_mask(&r, &aoi);
        let inside: u32 = mask.data().iter().map(|&v| v as u32).sum();
        assert_eq!(inside, 4);
        assert_eq!(mask.get(2, 2).unwrap(), 0);
    }
}
