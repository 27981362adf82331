//! # Terrawatch Colormap
//!
//! Color mapping and PNG rendering for index rasters and classification maps.
//!
//! Continuous rasters go through a multi-stop [`ColorScheme`] via
//! [`raster_to_rgba`]; categorical rasters (land-cover classes) go through a
//! [`CategoricalPalette`] via [`categories_to_rgb`]. Either buffer can be
//! written with [`write_png`].
//!
//! ## Usage
//!
//! ```ignore
//! use terrawatch_colormap::{auto_params, raster_to_rgba, write_png, ColorScheme, PixelLayout};
//!
//! let params = auto_params(&ndvi, ColorScheme::Ndvi);
//! let rgba = raster_to_rgba(&ndvi, &params);
//! write_png("ndvi.png", ndvi.cols(), ndvi.rows(), &rgba, PixelLayout::Rgba)?;
//! ```

mod png;
mod render;
mod scheme;

pub use png::{write_png, PixelLayout};
pub use render::{auto_params, categories_to_rgb, raster_to_rgba, CategoricalPalette, ColormapParams};
pub use scheme::{evaluate, ColorScheme, ColorStop, Rgb};
