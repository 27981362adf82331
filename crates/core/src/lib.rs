//! # Terrawatch Core
//!
//! Core types and I/O for the terrawatch satellite monitoring workspace.
//!
//! This crate provides:
//! - `Raster<T>`: Generic georeferenced raster grid
//! - `GeoTransform` and `CRS`: Georeferencing metadata
//! - `AreaOfInterest` and `DateRange`: Query primitives
//! - `ImageComposite`: Ordered multi-band image over one shared grid
//! - `RasterStore`: GeoTIFF reading and writing

pub mod aoi;
pub mod composite;
pub mod crs;
pub mod error;
pub mod io;
pub mod raster;

pub use aoi::{AreaOfInterest, DateRange};
pub use composite::{Band, ImageComposite};
pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{GeoTransform, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::aoi::{AreaOfInterest, DateRange};
    pub use crate::composite::{Band, ImageComposite};
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::io::{GeoTiffStore, RasterStore};
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
}
