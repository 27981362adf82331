//! Rule-based weak labels from spectral thresholds
//!
//! Bands are min–max normalized per band over the whole image, then every
//! pixel is labeled by the first matching row of an ordered threshold table.
//! The labels bootstrap supervised training where no ground truth exists.

use super::land_cover::LandCoverClass;
use crate::imagery::{normalized_difference_value, EPSILON};
use crate::maybe_rayon::*;
use crate::rules::DecisionList;
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use terrawatch_core::{Band, Error, ImageComposite, Result};

/// Bands the threshold table reads, in the order features are extracted
pub const LABEL_BANDS: [Band; 4] = [Band::Red, Band::Green, Band::Blue, Band::Nir];

/// Per-band min–max scaling fitted on one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandNormalizer {
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

impl BandNormalizer {
    /// Fit on a pixel-by-band matrix; NaN samples are ignored
    pub fn fit(pixels: ArrayView2<'_, f64>) -> Self {
        let (mins, maxs) = pixels
            .axis_iter(Axis(1))
            .map(|column| {
                let (lo, hi) = column
                    .iter()
                    .filter(|v| v.is_finite())
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                        (lo.min(v), hi.max(v))
                    });
                if lo > hi {
                    (0.0, 0.0)
                } else {
                    (lo, hi)
                }
            })
            .unzip();
        Self { mins, maxs }
    }

    pub fn band_count(&self) -> usize {
        self.mins.len()
    }

    #[inline]
    pub fn scale(&self, band: usize, value: f64) -> f64 {
        (value - self.mins[band]) / (self.maxs[band] - self.mins[band] + EPSILON)
    }

    pub fn transform(&self, pixels: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = pixels.to_owned();
        for (band, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            column.mapv_inplace(|v| self.scale(band, v));
        }
        out
    }
}

/// Normalized reflectances and the two indices the table thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelFeatures {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub nir: f64,
    pub ndvi: f64,
    pub ndwi: f64,
}

impl PixelFeatures {
    pub fn new(red: f64, green: f64, blue: f64, nir: f64) -> Self {
        Self {
            red,
            green,
            blue,
            nir,
            ndvi: normalized_difference_value(nir, red),
            ndwi: normalized_difference_value(green, nir),
        }
    }
}

/// The ordered threshold table; earlier rows take precedence
pub fn weak_label_rules() -> DecisionList<PixelFeatures, LandCoverClass> {
    DecisionList::<PixelFeatures, LandCoverClass>::new(LandCoverClass::Agriculture)
        .rule("ndwi_above_0.3", |p| p.ndwi > 0.3, LandCoverClass::Water)
        .rule("ndvi_above_0.6", |p| p.ndvi > 0.6, LandCoverClass::Forest)
        .rule("ndvi_above_0.3", |p| p.ndvi > 0.3, LandCoverClass::Grassland)
        .rule(
            "bright_rgb",
            |p| p.red > 0.3 && p.green > 0.3 && p.blue > 0.3,
            LandCoverClass::Urban,
        )
        .rule("ndvi_below_0.1", |p| p.ndvi < 0.1, LandCoverClass::Barren)
}

/// Labels the pixels of one image, whole or by index range
#[derive(Debug, Clone)]
pub struct WeakLabeler {
    rules: DecisionList<PixelFeatures, LandCoverClass>,
    normalized: Array2<f64>,
    columns: [usize; 4],
}

impl WeakLabeler {
    /// Normalize the composite's pixels; red, green, blue and NIR are required
    pub fn new(composite: &ImageComposite) -> Result<Self> {
        Self::from_pixels(composite.pixel_matrix().view(), &composite.bands())
    }

    /// Build from a pixel-by-band matrix whose columns follow `bands`
    pub fn from_pixels(pixels: ArrayView2<'_, f64>, bands: &[Band]) -> Result<Self> {
        let mut columns = [0usize; 4];
        for (slot, band) in columns.iter_mut().zip(LABEL_BANDS) {
            *slot = bands
                .iter()
                .position(|b| *b == band)
                .ok_or_else(|| Error::MissingBand(format!("weak labeling needs {}", band)))?;
        }
        let normalized = BandNormalizer::fit(pixels).transform(pixels);
        Ok(Self {
            rules: weak_label_rules(),
            normalized,
            columns,
        })
    }

    pub fn len(&self) -> usize {
        self.normalized.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn features(&self, pixel: usize) -> PixelFeatures {
        let row = self.normalized.row(pixel);
        let [r, g, b, n] = self.columns;
        PixelFeatures::new(row[r], row[g], row[b], row[n])
    }

    pub fn label_pixel(&self, pixel: usize) -> LandCoverClass {
        self.rules.evaluate(&self.features(pixel))
    }

    /// Class ids for the pixels in `range`, which must lie within the image
    pub fn label_range(&self, range: Range<usize>) -> Vec<u8> {
        let end = range.end.min(self.len());
        (range.start.min(end)..end)
            .into_par_iter()
            .map(|i| self.label_pixel(i).id())
            .collect()
    }

    pub fn label_all(&self) -> Vec<u8> {
        self.label_range(0..self.len())
    }
}

/// Weak labels for every pixel of a composite, row-major
pub fn generate_weak_labels(composite: &ImageComposite) -> Result<Vec<u8>> {
    Ok(WeakLabeler::new(composite)?.label_all())
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrawatch_core::{GeoTransform, Raster};

    fn features(ndvi: f64, ndwi: f64, rgb: f64) -> PixelFeatures {
        PixelFeatures {
            red: rgb,
            green: rgb,
            blue: rgb,
            nir: 0.5,
            ndvi,
            ndwi,
        }
    }

    #[test]
    fn test_green_pixel_is_water() {
        let p = PixelFeatures::new(0.1, 0.5, 0.1, 0.1);
        assert!((p.ndwi - 0.6667).abs() < 1e-3, "Expected NDWI 0.667, got {}", p.ndwi);
        assert_eq!(weak_label_rules().evaluate(&p), LandCoverClass::Water);
    }

    #[test]
    fn test_rule_precedence() {
        let rules = weak_label_rules();
        assert_eq!(rules.evaluate(&features(0.65, 0.1, 0.0)), LandCoverClass::Forest);
        // water wins over forest when both hold
        assert_eq!(rules.evaluate(&features(0.65, 0.35, 0.0)), LandCoverClass::Water);
        assert_eq!(rules.evaluate(&features(0.45, 0.0, 0.9)), LandCoverClass::Grassland);
        assert_eq!(rules.evaluate(&features(0.2, 0.0, 0.5)), LandCoverClass::Urban);
        assert_eq!(rules.evaluate(&features(0.05, 0.0, 0.2)), LandCoverClass::Barren);
        assert_eq!(rules.evaluate(&features(0.2, 0.0, 0.2)), LandCoverClass::Agriculture);
    }

    #[test]
    fn test_normalizer_maps_to_unit_interval() {
        let pixels = ndarray::array![[10.0, 0.2], [30.0, f64::NAN], [20.0, 0.4]];
        let norm = BandNormalizer::fit(pixels.view());
        let out = norm.transform(pixels.view());
        assert!(out[[0, 0]].abs() < 1e-9);
        assert!((out[[1, 0]] - 1.0).abs() < 1e-6);
        assert!((out[[2, 1]] - 1.0).abs() < 1e-6);
        assert!(out[[1, 1]].is_nan());
    }

    #[test]
    fn test_constant_band_does_not_divide_by_zero() {
        let pixels = ndarray::array![[0.3], [0.3]];
        let out = BandNormalizer::fit(pixels.view()).transform(pixels.view());
        assert_eq!(out[[0, 0]], 0.0);
    }

    fn band(values: Vec<f64>) -> Raster<f64> {
        let n = values.len();
        let mut r = Raster::from_vec(values, 1, n).unwrap();
        r.set_transform(GeoTransform::new(0.0, 1.0, 1.0, -1.0));
        r
    }

    #[test]
    fn test_labels_cover_every_pixel_and_ranges_agree() {
        let composite = ImageComposite::new(vec![
            (Band::Red, band(vec![0.02, 0.10, 0.30, 0.05])),
            (Band::Green, band(vec![0.20, 0.08, 0.30, 0.06])),
            (Band::Blue, band(vec![0.03, 0.05, 0.30, 0.04])),
            (Band::Nir, band(vec![0.01, 0.50, 0.25, 0.30])),
        ])
        .unwrap();

        let labeler = WeakLabeler::new(&composite).unwrap();
        let all = labeler.label_all();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|&l| (l as usize) < super::super::NUM_CLASSES));

        let mut chunked = labeler.label_range(0..2);
        chunked.extend(labeler.label_range(2..4));
        assert_eq!(all, chunked);
        assert_eq!(all[0], LandCoverClass::Water.id());
    }

    #[test]
    fn test_missing_rgb_band() {
        let composite =
            ImageComposite::new(vec![(Band::Red, band(vec![0.1])), (Band::Nir, band(vec![0.5]))])
                .unwrap();
        assert!(matches!(WeakLabeler::new(&composite), Err(Error::MissingBand(_))));
    }
}
