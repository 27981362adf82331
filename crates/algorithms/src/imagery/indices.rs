//! Spectral indices
//!
//! Normalized differences and ratios over single-band rasters. Every
//! denominator carries a small ε so co-zero inputs produce 0 rather than a
//! division fault; no-data inputs propagate as NaN.

use super::{build_output, check_dimensions, is_nodata_f64};
use crate::maybe_rayon::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use terrawatch_core::raster::Raster;
use terrawatch_core::{Band, Error, ImageComposite, Result};

/// Denominator guard for every index
pub const EPSILON: f64 = 1e-8;

/// Indices the monitoring workflows compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectralIndex {
    /// Vegetation: (NIR − Red) / (NIR + Red)
    Ndvi,
    /// Open water: (Green − NIR) / (Green + NIR)
    Ndwi,
    /// Built-up: (SWIR − NIR) / (SWIR + NIR)
    Ndbi,
    /// Moisture: (NIR − SWIR) / (NIR + SWIR)
    Ndmi,
    /// Moisture stress: SWIR / NIR
    Msi,
}

impl SpectralIndex {
    pub const ALL: [SpectralIndex; 5] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Ndwi,
        SpectralIndex::Ndbi,
        SpectralIndex::Ndmi,
        SpectralIndex::Msi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "NDVI",
            SpectralIndex::Ndwi => "NDWI",
            SpectralIndex::Ndbi => "NDBI",
            SpectralIndex::Ndmi => "NDMI",
            SpectralIndex::Msi => "MSI",
        }
    }

    /// (numerator-positive band, other band)
    pub fn bands(&self) -> (Band, Band) {
        match self {
            SpectralIndex::Ndvi => (Band::Nir, Band::Red),
            SpectralIndex::Ndwi => (Band::Green, Band::Nir),
            SpectralIndex::Ndbi => (Band::Swir, Band::Nir),
            SpectralIndex::Ndmi => (Band::Nir, Band::Swir),
            SpectralIndex::Msi => (Band::Swir, Band::Nir),
        }
    }

    /// Compute this index from the bands of a composite
    pub fn compute(&self, composite: &ImageComposite) -> Result<IndexRaster> {
        let (a, b) = self.bands();
        let (a, b) = (composite.band(a)?, composite.band(b)?);
        let raster = match self {
            SpectralIndex::Msi => ratio(a, b)?,
            _ => normalized_difference(a, b)?,
        };
        Ok(IndexRaster {
            index: *self,
            raster,
        })
    }
}

impl fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpectralIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SpectralIndex::ALL
            .into_iter()
            .find(|i| i.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Validation(format!("unknown spectral index '{}'", s)))
    }
}

/// An index raster tagged with the index it holds
#[derive(Debug, Clone)]
pub struct IndexRaster {
    pub index: SpectralIndex,
    pub raster: Raster<f64>,
}

// ---------------------------------------------------------------------------
// Per-pixel formulas
// ---------------------------------------------------------------------------

/// `(a − b) / (a + b + ε)`
#[inline]
pub fn normalized_difference_value(a: f64, b: f64) -> f64 {
    (a - b) / (a + b + EPSILON)
}

#[inline]
fn ratio_value(a: f64, b: f64) -> f64 {
    a / (b + EPSILON)
}

fn combine<F>(band_a: &Raster<f64>, band_b: &Raster<f64>, f: F) -> Result<Raster<f64>>
where
    F: Fn(f64, f64) -> f64 + Sync + Send,
{
    check_dimensions(band_a, band_b)?;

    let (rows, cols) = band_a.shape();
    let (nodata_a, nodata_b) = (band_a.nodata(), band_b.nodata());
    let (va, vb) = (band_a.view(), band_b.view());

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            (0..cols)
                .map(|col| {
                    let a = va[(row, col)];
                    let b = vb[(row, col)];
                    if is_nodata_f64(a, nodata_a) || is_nodata_f64(b, nodata_b) {
                        f64::NAN
                    } else {
                        f(a, b)
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let mut out = build_output(band_a, rows, cols, data)?;
    out.set_nodata(Some(f64::NAN));
    Ok(out)
}

// ---------------------------------------------------------------------------
// Raster indices
// ---------------------------------------------------------------------------

/// Normalized difference of two bands, in [-1, 1] for non-negative reflectances
pub fn normalized_difference(band_a: &Raster<f64>, band_b: &Raster<f64>) -> Result<Raster<f64>> {
    combine(band_a, band_b, normalized_difference_value)
}

/// `a / (b + ε)`
pub fn ratio(numerator: &Raster<f64>, denominator: &Raster<f64>) -> Result<Raster<f64>> {
    combine(numerator, denominator, ratio_value)
}

/// Normalized Difference Vegetation Index
///
/// - Dense vegetation: above 0.6
/// - Sparse vegetation: 0.2 to 0.5
/// - Water: negative
pub fn ndvi(nir: &Raster<f64>, red: &Raster<f64>) -> Result<Raster<f64>> {
    normalized_difference(nir, red)
}

/// Normalized Difference Water Index (McFeeters); positive over water
pub fn ndwi(green: &Raster<f64>, nir: &Raster<f64>) -> Result<Raster<f64>> {
    normalized_difference(green, nir)
}

/// Normalized Difference Built-up Index; positive over impervious surfaces
pub fn ndbi(swir: &Raster<f64>, nir: &Raster<f64>) -> Result<Raster<f64>> {
    normalized_difference(swir, nir)
}

/// Normalized Difference Moisture Index
pub fn ndmi(nir: &Raster<f64>, swir: &Raster<f64>) -> Result<Raster<f64>> {
    normalized_difference(nir, swir)
}

/// Moisture Stress Index: values above 1 indicate water stress
pub fn msi(swir: &Raster<f64>, nir: &Raster<f64>) -> Result<Raster<f64>> {
    ratio(swir, nir)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
