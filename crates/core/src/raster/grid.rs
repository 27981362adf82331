//! Georeferenced raster grid

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement};
use ndarray::{Array2, ArrayView2};

/// A georeferenced 2D raster grid.
///
/// Values are stored row-major in an `ndarray::Array2` together with the
/// affine transform, an optional CRS and an optional no-data value. Rasters
/// derived from one another (bands of a composite, index rasters, masks,
/// classification grids) share shape and transform; [`Raster::same_grid`]
/// checks that.
///
/// ```ignore
/// use terrawatch_core::Raster;
///
/// let mut nir: Raster<f64> = Raster::new(100, 100);
/// nir.set(10, 20, 0.42)?;
/// let mask = nir.with_same_meta::<u8>(100, 100);
/// nir.same_grid(&mask)?;
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    data: Array2<T>,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster from row-major data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Zero-filled raster of another cell type carrying this raster's georeferencing
    pub fn with_same_meta<U: RasterElement>(&self, rows: usize, cols: usize) -> Raster<U> {
        Raster {
            data: Array2::zeros((rows, cols)),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: None,
        }
    }

    /// Build a raster on this grid from row-major values of another type
    pub fn derive<U: RasterElement>(&self, values: Vec<U>) -> Result<Raster<U>> {
        let (rows, cols) = self.shape();
        let mut out = Raster::from_vec(values, rows, cols)?;
        out.transform = self.transform;
        out.crs = self.crs.clone();
        Ok(out)
    }

    /// Apply `f` to every cell, keeping the grid
    pub fn map<U: RasterElement, F>(&self, f: F) -> Raster<U>
    where
        F: Fn(T) -> U,
    {
        Raster {
            data: self.data.mapv(f),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: None,
        }
    }

    // Dimensions

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Ok when `other` has the same shape and transform as `self`
    pub fn same_grid<U: RasterElement>(&self, other: &Raster<U>) -> Result<()> {
        let (er, ec) = self.shape();
        let (ar, ac) = other.shape();
        if (er, ec) != (ar, ac) {
            return Err(Error::SizeMismatch { er, ec, ar, ac });
        }
        if !self.transform.approx_eq(&other.transform) {
            return Err(Error::TransformMismatch);
        }
        Ok(())
    }

    // Data access

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        let (rows, cols) = self.shape();
        match self.data.get_mut((row, col)) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::IndexOutOfBounds { row, col, rows, cols }),
        }
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    // Metadata

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Geographic bounds (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols(), self.rows())
    }

    /// Whether cell sizes are in degrees.
    ///
    /// Without a CRS, sub-degree cells are taken as geographic, which is how
    /// composites exported for small areas of interest come back.
    pub fn is_geographic(&self) -> bool {
        match &self.crs {
            Some(crs) => crs.is_geographic(),
            None => self.transform.cell_size() < 1.0,
        }
    }

    /// Ground area of one cell of `row` in square metres
    pub fn cell_area_m2(&self, row: usize) -> f64 {
        self.transform.cell_area_m2(row, self.is_geographic())
    }

    // Coordinate conversion

    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.transform.pixel_to_geo(col, row)
    }

    // Value checks

    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_creation() {
        let raster: Raster<f64> = Raster::new(100, 200);
        assert_eq!(raster.rows(), 100);
        assert_eq!(raster.cols(), 200);
        assert_eq!(raster.shape(), (100, 200));
    }

    #[test]
    fn test_raster_access() {
        let mut raster: Raster<f64> = Raster::new(10, 10);
        raster.set(5, 5, 0.42).unwrap();
        assert_eq!(raster.get(5, 5).unwrap(), 0.42);
        assert!(raster.set(10, 0, 1.0).is_err());
    }

    #[test]
    fn test_same_grid_detects_mismatch() {
        let mut a: Raster<f64> = Raster::new(4, 4);
        a.set_transform(GeoTransform::new(10.0, 20.0, 0.001, -0.001));
        let b = a.with_same_meta::<u8>(4, 4);
        assert!(a.same_grid(&b).is_ok());

        let c: Raster<u8> = Raster::new(4, 5);
        assert!(matches!(a.same_grid(&c), Err(Error::SizeMismatch { .. })));

        let mut d = b.clone();
        d.set_transform(GeoTransform::new(10.5, 20.0, 0.001, -0.001));
        assert!(matches!(a.same_grid(&d), Err(Error::TransformMismatch)));
    }

    #[test]
    fn test_derive_keeps_georeferencing() {
        let mut a: Raster<f64> = Raster::new(2, 2);
        a.set_crs(Some(CRS::wgs84()));
        let labels = a.derive(vec![0u8, 1, 2, 3]).unwrap();
        assert_eq!(labels.get(1, 1).unwrap(), 3);
        assert!(labels.crs().is_some());
        assert!(a.derive(vec![0u8; 3]).is_err());
    }
}
