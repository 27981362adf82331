//! PNG encoding of rendered buffers

use image::{ImageBuffer, Rgb as PixelRgb, Rgba};
use std::path::Path;
use terrawatch_core::{Error, Result};

/// Channel layout of a pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb,
    Rgba,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }
}

/// Write a row-major buffer as PNG, creating parent directories
pub fn write_png<P: AsRef<Path>>(
    path: P,
    width: usize,
    height: usize,
    pixels: &[u8],
    layout: PixelLayout,
) -> Result<()> {
    let path = path.as_ref();
    if pixels.len() != width * height * layout.channels() {
        return Err(Error::InvalidDimensions { width, height });
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let (w, h) = (
        u32::try_from(width).map_err(|_| Error::InvalidDimensions { width, height })?,
        u32::try_from(height).map_err(|_| Error::InvalidDimensions { width, height })?,
    );
    let saved = match layout {
        PixelLayout::Rgb => ImageBuffer::<PixelRgb<u8>, _>::from_raw(w, h, pixels.to_vec())
            .ok_or(Error::InvalidDimensions { width, height })?
            .save_with_format(path, image::ImageFormat::Png),
        PixelLayout::Rgba => ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, pixels.to_vec())
            .ok_or(Error::InvalidDimensions { width, height })?
            .save_with_format(path, image::ImageFormat::Png),
    };
    saved.map_err(|e| Error::Format(format!("{}: {}", path.display(), e)))
}
