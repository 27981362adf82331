//! Multi-band image composites

use crate::aoi::DateRange;
use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Spectral bands used by the monitoring workflows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Red,
    Green,
    Blue,
    Nir,
    Swir,
}

impl Band {
    /// Canonical export order (red, green, blue, near infrared, shortwave infrared)
    pub const ALL: [Band; 5] = [Band::Red, Band::Green, Band::Blue, Band::Nir, Band::Swir];

    pub fn name(&self) -> &'static str {
        match self {
            Band::Red => "red",
            Band::Green => "green",
            Band::Blue => "blue",
            Band::Nir => "nir",
            Band::Swir => "swir",
        }
    }

    /// Parse a comma separated band list such as `red,green,blue,nir`
    pub fn parse_list(list: &str) -> Result<Vec<Band>> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse())
            .collect()
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Band {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "red" | "b4" => Ok(Band::Red),
            "green" | "b3" => Ok(Band::Green),
            "blue" | "b2" => Ok(Band::Blue),
            "nir" | "b8" => Ok(Band::Nir),
            "swir" | "swir1" | "b11" => Ok(Band::Swir),
            other => Err(Error::Validation(format!("unknown band '{}'", other))),
        }
    }
}

/// Ordered set of co-registered band rasters over one area and date range.
///
/// Every band shares the shape and transform of the first; band order is the
/// feature order used for classification.
#[derive(Debug, Clone)]
pub struct ImageComposite {
    bands: Vec<(Band, Raster<f64>)>,
    date_range: Option<DateRange>,
    cloud_cover: Option<f64>,
}

impl ImageComposite {
    pub fn new(bands: Vec<(Band, Raster<f64>)>) -> Result<Self> {
        let Some((_, first)) = bands.first() else {
            return Err(Error::Validation("composite needs at least one band".into()));
        };
        if first.is_empty() {
            return Err(Error::InvalidDimensions {
                width: first.cols(),
                height: first.rows(),
            });
        }
        for (i, (band, raster)) in bands.iter().enumerate() {
            first.same_grid(raster)?;
            if bands[..i].iter().any(|(b, _)| b == band) {
                return Err(Error::Validation(format!("duplicate band '{}'", band)));
            }
        }
        Ok(Self {
            bands,
            date_range: None,
            cloud_cover: None,
        })
    }

    /// Split a (rows, cols, bands) stack into a composite with the given band order
    pub fn from_stack(
        stack: Vec<Array2<f64>>,
        order: &[Band],
        transform: GeoTransform,
        crs: Option<CRS>,
    ) -> Result<Self> {
        if stack.len() < order.len() {
            return Err(Error::MissingBand(format!(
                "image has {} bands, {} requested ({})",
                stack.len(),
                order.len(),
                order.iter().map(Band::name).collect::<Vec<_>>().join(",")
            )));
        }
        let bands = order
            .iter()
            .zip(stack)
            .map(|(&band, data)| {
                let mut raster = Raster::from_array(data);
                raster.set_transform(transform);
                raster.set_crs(crs.clone());
                (band, raster)
            })
            .collect();
        Self::new(bands)
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// Attach the cloud-cover percentage of the scenes the composite was built from
    pub fn with_cloud_cover(mut self, percent: f64) -> Self {
        self.cloud_cover = Some(percent);
        self
    }

    pub fn date_range(&self) -> Option<&DateRange> {
        self.date_range.as_ref()
    }

    pub fn cloud_cover(&self) -> Option<f64> {
        self.cloud_cover
    }

    /// Raster of one band
    pub fn band(&self, band: Band) -> Result<&Raster<f64>> {
        self.bands
            .iter()
            .find(|(b, _)| *b == band)
            .map(|(_, r)| r)
            .ok_or_else(|| Error::MissingBand(band.name().to_string()))
    }

    /// Position of a band in the feature order
    pub fn band_index(&self, band: Band) -> Option<usize> {
        self.bands.iter().position(|(b, _)| *b == band)
    }

    pub fn bands(&self) -> Vec<Band> {
        self.bands.iter().map(|(b, _)| *b).collect()
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn rasters(&self) -> impl Iterator<Item = (Band, &Raster<f64>)> {
        self.bands.iter().map(|(b, r)| (*b, r))
    }

    /// Georeferenced template every derived raster is built on
    pub fn template(&self) -> &Raster<f64> {
        &self.bands[0].1
    }

    pub fn shape(&self) -> (usize, usize) {
        self.template().shape()
    }

    pub fn pixel_count(&self) -> usize {
        self.template().len()
    }

    pub fn transform(&self) -> &GeoTransform {
        self.template().transform()
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.template().crs()
    }

    /// Bounds as (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.template().bounds()
    }

    /// Pixel-by-band matrix in row-major pixel order
    pub fn pixel_matrix(&self) -> Array2<f64> {
        let n = self.pixel_count();
        let mut matrix = Array2::zeros((n, self.bands.len()));
        for (j, (_, raster)) in self.bands.iter().enumerate() {
            for (dst, &v) in matrix.column_mut(j).iter_mut().zip(raster.data().iter()) {
                *dst = v;
            }
        }
        matrix
    }

    /// Pixel-by-band matrix with columns in the order of `bands`
    pub fn band_matrix(&self, bands: &[Band]) -> Result<Array2<f64>> {
        let mut matrix = Array2::zeros((self.pixel_count(), bands.len()));
        for (j, band) in bands.iter().enumerate() {
            let raster = self.band(*band)?;
            for (dst, &v) in matrix.column_mut(j).iter_mut().zip(raster.data().iter()) {
                *dst = v;
            }
        }
        Ok(matrix)
    }

    /// Check that another composite covers the same grid, for two-period comparisons
    pub fn same_grid(&self, other: &ImageComposite) -> Result<()> {
        self.template().same_grid(other.template())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(rows: usize, cols: usize, value: f64) -> Raster<f64> {
        let mut r = Raster::filled(rows, cols, value);
        r.set_transform(GeoTransform::new(0.0, 1.0, 0.01, -0.01));
        r
    }

    #[test]
    fn test_pixel_matrix_keeps_band_order() {
        let composite = ImageComposite::new(vec![
            (Band::Red, band(2, 3, 0.1)),
            (Band::Nir, band(2, 3, 0.5)),
        ])
        .unwrap();

        let m = composite.pixel_matrix();
        assert_eq!(m.dim(), (6, 2));
        assert_eq!(m[[4, 0]], 0.1);
        assert_eq!(m[[4, 1]], 0.5);
        assert_eq!(composite.band_index(Band::Nir), Some(1));

        let swapped = composite.band_matrix(&[Band::Nir, Band::Red]).unwrap();
        assert_eq!(swapped[[4, 0]], 0.5);
        assert!(matches!(composite.band_matrix(&[Band::Swir]), Err(Error::MissingBand(_))));
    }

    #[test]
    fn test_rejects_mismatched_and_duplicate_bands() {
        let r = ImageComposite::new(vec![(Band::Red, band(2, 3, 0.1)), (Band::Nir, band(3, 3, 0.5))]);
        assert!(matches!(r, Err(Error::SizeMismatch { .. })));

        let r = ImageComposite::new(vec![(Band::Red, band(2, 3, 0.1)), (Band::Red, band(2, 3, 0.5))]);
        assert!(matches!(r, Err(Error::Validation(_))));

        assert!(ImageComposite::new(Vec::new()).is_err());
    }

    #[test]
    fn test_missing_band() {
        let composite = ImageComposite::new(vec![(Band::Red, band(1, 1, 0.1))]).unwrap();
        assert!(matches!(composite.band(Band::Swir), Err(Error::MissingBand(_))));
    }

    #[test]
    fn test_from_stack_requires_enough_bands() {
        let stack = vec![Array2::zeros((2, 2)); 3];
        let order = [Band::Red, Band::Green, Band::Blue, Band::Nir];
        assert!(ImageComposite::from_stack(stack, &order, GeoTransform::default(), None).is_err());
    }

    #[test]
    fn test_parse_band_list() {
        let bands = Band::parse_list("red, green,blue,B8").unwrap();
        assert_eq!(bands, vec![Band::Red, Band::Green, Band::Blue, Band::Nir]);
        assert!(Band::parse_list("red,thermal").is_err());
    }
}
