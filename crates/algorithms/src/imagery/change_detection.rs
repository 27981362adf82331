//! Two-period change detection
//!
//! Thematic masks (urban, forest, water) are thresholded from index rasters,
//! their areas summed from per-pixel ground area, and compared between an
//! old and a new composite.

use super::{build_output, check_dimensions, is_nodata_f64, ndbi, ndvi, ndwi};
use crate::maybe_rayon::*;
use serde::{Deserialize, Serialize};
use terrawatch_core::raster::Raster;
use terrawatch_core::{Band, ImageComposite, Result};

/// NDVI above which a pixel counts as forest
pub const FOREST_NDVI_THRESHOLD: f64 = 0.6;
/// NDWI above which a pixel counts as water
pub const WATER_NDWI_THRESHOLD: f64 = 0.3;
/// NDBI above which a pixel may be built-up
pub const URBAN_NDBI_THRESHOLD: f64 = 0.0;
/// Built-up pixels must also have NDVI below this
pub const URBAN_NDVI_CEILING: f64 = 0.2;

/// Strict comparison used when thresholding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Greater,
    Less,
}

impl Comparison {
    fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Greater => value > threshold,
            Comparison::Less => value < threshold,
        }
    }
}

// ---------------------------------------------------------------------------
// Masks
// ---------------------------------------------------------------------------

/// 1 where `raster <cmp> threshold`, 0 elsewhere (including no-data)
pub fn threshold_mask(raster: &Raster<f64>, cmp: Comparison, threshold: f64) -> Result<Raster<u8>> {
    let (rows, cols) = raster.shape();
    let nodata = raster.nodata();
    let view = raster.view();

    let data: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            (0..cols)
                .map(|col| {
                    let v = view[(row, col)];
                    u8::from(!is_nodata_f64(v, nodata) && cmp.holds(v, threshold))
                })
                .collect::<Vec<_>>()
        })
        .collect();

    build_output(raster, rows, cols, data)
}

fn combine_masks<F>(a: &Raster<u8>, b: &Raster<u8>, f: F) -> Result<Raster<u8>>
where
    F: Fn(bool, bool) -> bool,
{
    check_dimensions(a, b)?;
    let mut out = a.clone();
    for (dst, &other) in out.data_mut().iter_mut().zip(b.data().iter()) {
        *dst = u8::from(f(*dst != 0, other != 0));
    }
    Ok(out)
}

/// Pixels set in `a` but not in `b`
pub fn and_not(a: &Raster<u8>, b: &Raster<u8>) -> Result<Raster<u8>> {
    combine_masks(a, b, |x, y| x && !y)
}

/// Built-up surfaces: NDBI > 0 and NDVI < 0.2
pub fn urban_mask(ndbi: &Raster<f64>, ndvi: &Raster<f64>) -> Result<Raster<u8>> {
    let built = threshold_mask(ndbi, Comparison::Greater, URBAN_NDBI_THRESHOLD)?;
    let sparse = threshold_mask(ndvi, Comparison::Less, URBAN_NDVI_CEILING)?;
    combine_masks(&built, &sparse, |x, y| x && y)
}

/// Dense canopy: NDVI > 0.6
pub fn forest_mask(ndvi: &Raster<f64>) -> Result<Raster<u8>> {
    threshold_mask(ndvi, Comparison::Greater, FOREST_NDVI_THRESHOLD)
}

/// Open water: NDWI > 0.3
pub fn water_mask(ndwi: &Raster<f64>) -> Result<Raster<u8>> {
    threshold_mask(ndwi, Comparison::Greater, WATER_NDWI_THRESHOLD)
}

/// Ground area of the set pixels of a mask, in km²
pub fn mask_area_km2(mask: &Raster<u8>) -> f64 {
    let m2: f64 = mask
        .data()
        .rows()
        .into_iter()
        .enumerate()
        .map(|(row, values)| {
            let set = values.iter().filter(|&&v| v != 0).count();
            set as f64 * mask.cell_area_m2(row)
        })
        .sum();
    m2 / 1e6
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Area of a class in two periods
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaChange {
    pub old_km2: f64,
    pub new_km2: f64,
    pub delta_km2: f64,
    /// `delta / old * 100`, 0 when the old area is zero
    pub percentage_change: f64,
}

impl AreaChange {
    pub fn new(old_km2: f64, new_km2: f64) -> Self {
        let delta_km2 = new_km2 - old_km2;
        Self {
            old_km2,
            new_km2,
            delta_km2,
            percentage_change: percentage_of(delta_km2, old_km2),
        }
    }
}

fn percentage_of(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

/// Urban extent in two periods and the newly built-up area
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrbanSprawl {
    pub change: AreaChange,
    /// Area urban in the new period but not the old
    pub growth_km2: f64,
    /// `growth / old * 100`, 0 when there was no urban area
    pub growth_percentage: f64,
    #[serde(skip)]
    pub growth_mask: Raster<u8>,
}

/// Forest extent in two periods with loss and gain
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForestChange {
    pub change: AreaChange,
    pub loss_km2: f64,
    pub gain_km2: f64,
    #[serde(skip)]
    pub loss_mask: Raster<u8>,
    #[serde(skip)]
    pub gain_mask: Raster<u8>,
}

/// Surface water in one period
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterBodies {
    pub area_km2: f64,
    pub area_m2: f64,
    pub ndwi_threshold: f64,
    #[serde(skip)]
    pub mask: Raster<u8>,
}

fn composite_ndvi(c: &ImageComposite) -> Result<Raster<f64>> {
    ndvi(c.band(Band::Nir)?, c.band(Band::Red)?)
}

/// Compare built-up extent between two co-registered composites
pub fn detect_urban_sprawl(old: &ImageComposite, new: &ImageComposite) -> Result<UrbanSprawl> {
    old.same_grid(new)?;

    let urban = |c: &ImageComposite| -> Result<Raster<u8>> {
        let ndbi = ndbi(c.band(Band::Swir)?, c.band(Band::Nir)?)?;
        urban_mask(&ndbi, &composite_ndvi(c)?)
    };
    let old_mask = urban(old)?;
    let new_mask = urban(new)?;
    let growth_mask = and_not(&new_mask, &old_mask)?;

    let change = AreaChange::new(mask_area_km2(&old_mask), mask_area_km2(&new_mask));
    let growth_km2 = mask_area_km2(&growth_mask);

    Ok(UrbanSprawl {
        change,
        growth_km2,
        growth_percentage: percentage_of(growth_km2, change.old_km2),
        growth_mask,
    })
}

/// Compare dense-canopy extent between two co-registered composites
pub fn detect_forest_change(old: &ImageComposite, new: &ImageComposite) -> Result<ForestChange> {
    old.same_grid(new)?;

    let old_mask = forest_mask(&composite_ndvi(old)?)?;
    let new_mask = forest_mask(&composite_ndvi(new)?)?;
    let loss_mask = and_not(&old_mask, &new_mask)?;
    let gain_mask = and_not(&new_mask, &old_mask)?;

    Ok(ForestChange {
        change: AreaChange::new(mask_area_km2(&old_mask), mask_area_km2(&new_mask)),
        loss_km2: mask_area_km2(&loss_mask),
        gain_km2: mask_area_km2(&gain_mask),
        loss_mask,
        gain_mask,
    })
}

/// Map surface water in one composite
pub fn detect_water(composite: &ImageComposite) -> Result<WaterBodies> {
    let ndwi = ndwi(composite.band(Band::Green)?, composite.band(Band::Nir)?)?;
    let mask = water_mask(&ndwi)?;
    let area_km2 = mask_area_km2(&mask);
    Ok(WaterBodies {
        area_km2,
        area_m2: area_km2 * 1e6,
        ndwi_threshold: WATER_NDWI_THRESHOLD,
        mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use terrawatch_core::{GeoTransform, CRS};

    /// 10 m projected pixels, so each pixel is 100 m²
    fn make_band(values: Vec<f64>, rows: usize, cols: usize) -> Raster<f64> {
        let mut r = Raster::from_vec(values, rows, cols).unwrap();
        r.set_transform(GeoTransform::new(500_000.0, 4_000_000.0, 10.0, -10.0));
        r.set_crs(Some(CRS::from_epsg(32630)));
        r
    }

    fn composite(red: Vec<f64>, nir: Vec<f64>, swir: Vec<f64>) -> ImageComposite {
        let n = red.len();
        ImageComposite::new(vec![
            (Band::Red, make_band(red, 1, n)),
            (Band::Green, make_band(vec![0.1; n], 1, n)),
            (Band::Nir, make_band(nir, 1, n)),
            (Band::Swir, make_band(swir, 1, n)),
        ])
        .unwrap()
    }

    #[test]
    fn test_area_change_percentage() {
        let change = AreaChange::new(4.5, 3.4);
        assert_relative_eq!(change.delta_km2, -1.1, epsilon = 1e-12);
        assert_relative_eq!(change.percentage_change, -24.444, epsilon = 1e-3);
    }

    #[test]
    fn test_zero_old_area_gives_zero_percentage() {
        let change = AreaChange::new(0.0, 2.0);
        assert_eq!(change.percentage_change, 0.0);
        assert!(change.percentage_change.is_finite());
    }

    #[test]
    fn test_threshold_mask_skips_nan() {
        let r = make_band(vec![0.7, f64::NAN, 0.5, 0.61], 2, 2);
        let mask = forest_mask(&r).unwrap();
        assert_eq!(mask.data().iter().copied().collect::<Vec<_>>(), vec![1, 0, 0, 1]);
    }

    #[test]
    fn test_mask_area_projected() {
        let mask = make_band(vec![0.0; 4], 2, 2).map(|_| 1u8);
        assert_relative_eq!(mask_area_km2(&mask), 400.0 / 1e6, epsilon = 1e-15);
    }

    #[test]
    fn test_forest_loss_and_gain() {
        // NIR/Red ratios give NDVI of ~0.8, ~0.8, ~0.0, ~0.0 then ~0.8, ~0.0, ~0.8, ~0.0
        let old = composite(vec![0.05, 0.05, 0.3, 0.3], vec![0.45, 0.45, 0.3, 0.3], vec![0.2; 4]);
        let new = composite(vec![0.05, 0.3, 0.05, 0.3], vec![0.45, 0.3, 0.45, 0.3], vec![0.2; 4]);

        let report = detect_forest_change(&old, &new).unwrap();
        assert_relative_eq!(report.change.old_km2, 200.0 / 1e6, epsilon = 1e-15);
        assert_relative_eq!(report.change.new_km2, 200.0 / 1e6, epsilon = 1e-15);
        assert_relative_eq!(report.loss_km2, 100.0 / 1e6, epsilon = 1e-15);
        assert_relative_eq!(report.gain_km2, 100.0 / 1e6, epsilon = 1e-15);
        assert_eq!(report.change.percentage_change, 0.0);
    }

    #[test]
    fn test_urban_growth() {
        // urban where SWIR > NIR and NDVI < 0.2
        let old = composite(vec![0.3, 0.3, 0.3], vec![0.3, 0.3, 0.3], vec![0.4, 0.1, 0.1]);
        let new = composite(vec![0.3, 0.3, 0.3], vec![0.3, 0.3, 0.3], vec![0.4, 0.4, 0.1]);

        let report = detect_urban_sprawl(&old, &new).unwrap();
        assert_relative_eq!(report.growth_km2, 100.0 / 1e6, epsilon = 1e-15);
        assert_relative_eq!(report.growth_percentage, 100.0, epsilon = 1e-9);
        assert_relative_eq!(report.change.percentage_change, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_urban_requires_swir() {
        let n = 2;
        let without_swir = ImageComposite::new(vec![
            (Band::Red, make_band(vec![0.1; n], 1, n)),
            (Band::Nir, make_band(vec![0.2; n], 1, n)),
        ])
        .unwrap();
        assert!(detect_urban_sprawl(&without_swir, &without_swir).is_err());
    }

    #[test]
    fn test_water_area() {
        // green 0.1: NDWI > 0.3 only where NIR < ~0.054
        let c = composite(vec![0.1; 3], vec![0.02, 0.02, 0.3], vec![0.1; 3]);
        let water = detect_water(&c).unwrap();
        assert_relative_eq!(water.area_m2, 200.0, epsilon = 1e-9);
    }

    #[test]
    fn test_periods_must_share_grid() {
        let a = composite(vec![0.1; 3], vec![0.5; 3], vec![0.1; 3]);
        let b = composite(vec![0.1; 4], vec![0.5; 4], vec![0.1; 4]);
        assert!(detect_forest_change(&a, &b).is_err());
    }
}
