//! Raster to pixel-buffer rendering

use crate::scheme::{evaluate, ColorScheme, Rgb};
use terrawatch_core::raster::{Raster, RasterElement};

/// Parameters for continuous colormap rendering.
#[derive(Debug, Clone)]
pub struct ColormapParams {
    pub scheme: ColorScheme,
    /// Values at or below this map to the first stop.
    pub min: f64,
    /// Values at or above this map to the last stop.
    pub max: f64,
    /// RGBA for nodata and NaN pixels. Default: fully transparent.
    pub nodata_color: [u8; 4],
}

impl ColormapParams {
    pub fn new(scheme: ColorScheme) -> Self {
        Self::with_range(scheme, 0.0, 1.0)
    }

    pub fn with_range(scheme: ColorScheme, min: f64, max: f64) -> Self {
        Self {
            scheme,
            min,
            max,
            nodata_color: [0, 0, 0, 0],
        }
    }
}

/// Parameters spanning the valid data range of a raster.
///
/// All-nodata rasters fall back to [0, 1]; constant rasters get a unit range.
pub fn auto_params<T: RasterElement>(raster: &Raster<T>, scheme: ColorScheme) -> ColormapParams {
    let nodata = raster.nodata();
    let (min, max) = raster
        .data()
        .iter()
        .filter(|v| !v.is_nodata(nodata))
        .filter_map(|v| v.to_f64())
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

    if !min.is_finite() || !max.is_finite() {
        ColormapParams::with_range(scheme, 0.0, 1.0)
    } else if (max - min).abs() < f64::EPSILON {
        ColormapParams::with_range(scheme, min, min + 1.0)
    } else {
        ColormapParams::with_range(scheme, min, max)
    }
}

/// Row-major RGBA buffer (`rows * cols * 4` bytes) of a continuous raster.
pub fn raster_to_rgba<T: RasterElement>(raster: &Raster<T>, params: &ColormapParams) -> Vec<u8> {
    let nodata = raster.nodata();
    let range = params.max - params.min;
    let inv_range = if range.abs() > f64::EPSILON { 1.0 / range } else { 1.0 };

    let mut rgba = Vec::with_capacity(raster.len() * 4);
    for val in raster.data().iter() {
        match val.to_f64() {
            Some(v) if v.is_finite() && !val.is_nodata(nodata) => {
                let Rgb { r, g, b } = evaluate(params.scheme, (v - params.min) * inv_range);
                rgba.extend_from_slice(&[r, g, b, 255]);
            }
            _ => rgba.extend_from_slice(&params.nodata_color),
        }
    }
    rgba
}

/// Fixed colors for class ids `0..len`
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalPalette {
    colors: Vec<Rgb>,
    /// Color for ids past the end of the palette
    unknown: Rgb,
}

impl CategoricalPalette {
    pub fn new(colors: Vec<Rgb>) -> Self {
        Self {
            colors,
            unknown: Rgb::new(0, 0, 0),
        }
    }

    pub fn with_unknown(mut self, color: Rgb) -> Self {
        self.unknown = color;
        self
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn color(&self, id: u8) -> Rgb {
        self.colors.get(id as usize).copied().unwrap_or(self.unknown)
    }

    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }
}

/// Row-major RGB buffer (`rows * cols * 3` bytes) of a class-id raster.
pub fn categories_to_rgb(raster: &Raster<u8>, palette: &CategoricalPalette) -> Vec<u8> {
    raster
        .data()
        .iter()
        .flat_map(|&id| palette.color(id).to_array())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_to_rgba_basic() {
        let mut r = Raster::<f64>::new(2, 2);
        r.set(0, 0, 0.0).unwrap();
        r.set(0, 1, 0.5).unwrap();
        r.set(1, 0, 1.0).unwrap();
        r.set(1, 1, f64::NAN).unwrap();

        let params = ColormapParams::with_range(ColorScheme::Grayscale, 0.0, 1.0);
        let rgba = raster_to_rgba(&r, &params);

        assert_eq!(rgba.len(), 16);
        assert_eq!(&rgba[0..4], &[0, 0, 0, 255]);
        assert_eq!(&rgba[4..8], &[128, 128, 128, 255]);
        assert_eq!(&rgba[8..12], &[255, 255, 255, 255]);
        assert_eq!(&rgba[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn auto_params_range() {
        let r = Raster::from_vec(vec![-0.2, 0.1, 0.8], 1, 3).unwrap();
        let params = auto_params(&r, ColorScheme::Ndvi);
        assert!((params.min + 0.2).abs() < f64::EPSILON);
        assert!((params.max - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn auto_params_degenerate() {
        let nan = Raster::<f64>::filled(1, 2, f64::NAN);
        let params = auto_params(&nan, ColorScheme::Water);
        assert_eq!((params.min, params.max), (0.0, 1.0));

        let constant = Raster::<f64>::filled(2, 2, 42.0);
        let params = auto_params(&constant, ColorScheme::Water);
        assert_eq!((params.min, params.max), (42.0, 43.0));
    }

    #[test]
    fn categories_use_palette() {
        let palette = CategoricalPalette::new(vec![Rgb::new(52, 152, 219), Rgb::new(39, 174, 96)])
            .with_unknown(Rgb::new(1, 2, 3));
        let classes = Raster::from_vec(vec![1u8, 0, 9], 1, 3).unwrap();
        let rgb = categories_to_rgb(&classes, &palette);
        assert_eq!(rgb, vec![39, 174, 96, 52, 152, 219, 1, 2, 3]);
    }
}
