//! Classification overlay for map display

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use terrawatch_algorithms::classification::{ClassificationGrid, LandCoverClass};
use terrawatch_colormap::{categories_to_rgb, write_png, CategoricalPalette, PixelLayout, Rgb};
use terrawatch_core::{Error, Result};

pub const OVERLAY_FILE: &str = "classification_overlay.png";
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySize {
    pub width: usize,
    pub height: usize,
}

/// Everything a map client needs to place and explain the overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayMetadata {
    pub bounds: OverlayBounds,
    pub size: OverlaySize,
    /// Class names indexed by id
    pub classes: Vec<String>,
    /// Class id to RGB
    pub colors: BTreeMap<u8, [u8; 3]>,
}

pub fn land_cover_palette() -> CategoricalPalette {
    CategoricalPalette::new(LandCoverClass::ALL.iter().map(|c| Rgb::from_array(c.color())).collect())
}

impl OverlayMetadata {
    pub fn for_grid(grid: &ClassificationGrid) -> Self {
        let (min_x, min_y, max_x, max_y) = grid.raster.bounds();
        let (height, width) = grid.shape();
        Self {
            bounds: OverlayBounds {
                north: max_y,
                south: min_y,
                east: max_x,
                west: min_x,
            },
            size: OverlaySize { width, height },
            classes: LandCoverClass::ALL.iter().map(|c| c.name().to_string()).collect(),
            colors: LandCoverClass::ALL.iter().map(|c| (c.id(), c.color())).collect(),
        }
    }
}

/// Write the RGB overlay and `metadata.json` into `dir`; returns the PNG path
pub fn render_overlay(grid: &ClassificationGrid, dir: &Path) -> Result<(PathBuf, OverlayMetadata)> {
    std::fs::create_dir_all(dir)?;
    let (rows, cols) = grid.shape();

    let tile_path = dir.join(OVERLAY_FILE);
    let rgb = categories_to_rgb(&grid.raster, &land_cover_palette());
    write_png(&tile_path, cols, rows, &rgb, PixelLayout::Rgb)?;

    let metadata = OverlayMetadata::for_grid(grid);
    let writer = BufWriter::new(File::create(dir.join(METADATA_FILE))?);
    serde_json::to_writer_pretty(writer, &metadata).map_err(|e| Error::Format(e.to_string()))?;

    Ok((tile_path, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrawatch_core::{GeoTransform, Raster};

    #[test]
    fn overlay_and_metadata_written() {
        let mut raster = Raster::from_vec(vec![0u8, 1, 3, 5, 5, 2], 2, 3).unwrap();
        raster.set_transform(GeoTransform::new(-3.70, 40.45, 0.01, -0.01));
        let grid = ClassificationGrid::new(raster).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let (png, metadata) = render_overlay(&grid, dir.path()).unwrap();
        assert!(png.ends_with(OVERLAY_FILE));
        assert!(png.exists());

        assert_eq!(metadata.size, OverlaySize { width: 3, height: 2 });
        assert!((metadata.bounds.north - 40.45).abs() < 1e-12);
        assert!((metadata.bounds.east - (-3.67)).abs() < 1e-9);
        assert_eq!(metadata.classes[0], "Water");
        assert_eq!(metadata.colors[&3], [231, 76, 60]);

        let text = std::fs::read_to_string(dir.path().join(METADATA_FILE)).unwrap();
        let parsed: OverlayMetadata = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, metadata);
    }
}
