//! Export scale selection
//!
//! Picks the finest resolution from a fixed ladder such that a square export
//! covering the area of interest stays under the provider's per-side pixel
//! ceiling.

use serde::{Deserialize, Serialize};
use terrawatch_core::{Error, Result};

/// Resolutions offered to providers, metres per pixel, ascending
pub const DEFAULT_LADDER: [f64; 6] = [10.0, 30.0, 50.0, 100.0, 500.0, 1000.0];

/// Largest export side, in pixels, a provider accepts
pub const DEFAULT_MAX_SIDE_PIXELS: u64 = 30_000;

/// Side length floor in metres; keeps zero-area requests well defined
const MIN_SIDE_M: f64 = 1.0;

/// Where a chosen scale came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleSource {
    Ladder,
    /// Sensor with a fixed native resolution, ladder bypassed
    Native,
}

/// Outcome of a scale selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleChoice {
    pub scale_m: f64,
    /// Smallest scale that would satisfy the ceiling
    pub min_scale_m: f64,
    /// Pixels along one side of the square export at `scale_m`
    pub side_pixels: u64,
    pub source: ScaleSource,
}

/// Chooses export resolutions from a ladder or a fixed native resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleSelector {
    ladder: Vec<f64>,
    max_side_pixels: u64,
    native: Option<f64>,
}

impl Default for ScaleSelector {
    fn default() -> Self {
        Self {
            ladder: DEFAULT_LADDER.to_vec(),
            max_side_pixels: DEFAULT_MAX_SIDE_PIXELS,
            native: None,
        }
    }
}

impl ScaleSelector {
    /// Selector over a custom ladder; rungs must be positive and strictly ascending
    pub fn new(ladder: Vec<f64>, max_side_pixels: u64) -> Result<Self> {
        if ladder.is_empty() {
            return Err(Error::InvalidParameter {
                name: "ladder",
                value: "[]".into(),
                reason: "at least one resolution required".into(),
            });
        }
        if ladder.iter().any(|s| !s.is_finite() || *s <= 0.0)
            || ladder.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(Error::InvalidParameter {
                name: "ladder",
                value: format!("{:?}", ladder),
                reason: "resolutions must be positive and strictly ascending".into(),
            });
        }
        if max_side_pixels == 0 {
            return Err(Error::InvalidParameter {
                name: "max_side_pixels",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(Self {
            ladder,
            max_side_pixels,
            native: None,
        })
    }

    /// Selector for a sensor that only exports at `resolution_m`
    pub fn native(resolution_m: f64) -> Self {
        Self {
            native: Some(resolution_m),
            ..Self::default()
        }
    }

    pub fn ladder(&self) -> &[f64] {
        &self.ladder
    }

    pub fn max_side_pixels(&self) -> u64 {
        self.max_side_pixels
    }

    fn side_m(area_km2: f64) -> Result<f64> {
        if area_km2.is_nan() || area_km2 < 0.0 {
            return Err(Error::Validation(format!("invalid area: {} km²", area_km2)));
        }
        Ok((area_km2 * 1e6).sqrt().max(MIN_SIDE_M))
    }

    fn side_pixels(side_m: f64, scale_m: f64) -> u64 {
        (side_m / scale_m).ceil() as u64
    }

    /// Finest rung whose square export of `area_km2` fits the pixel ceiling
    pub fn select(&self, area_km2: f64) -> Result<ScaleChoice> {
        let side = Self::side_m(area_km2)?;
        let min_scale_m = side / self.max_side_pixels as f64;

        if let Some(native) = self.native {
            return Ok(ScaleChoice {
                scale_m: native,
                min_scale_m,
                side_pixels: Self::side_pixels(side, native),
                source: ScaleSource::Native,
            });
        }

        self.ladder
            .iter()
            .map(|&scale_m| (scale_m, Self::side_pixels(side, scale_m)))
            .find(|&(_, pixels)| pixels <= self.max_side_pixels)
            .map(|(scale_m, side_pixels)| ScaleChoice {
                scale_m,
                min_scale_m,
                side_pixels,
                source: ScaleSource::Ladder,
            })
            .ok_or_else(|| Error::SizeLimitExceeded {
                side_pixels: self.ladder.last().map_or(u64::MAX, |&s| Self::side_pixels(side, s)),
                ceiling: self.max_side_pixels,
            })
    }

    /// Next rung above `scale_m`, used when a provider rejects an export as too large
    pub fn coarser(&self, scale_m: f64) -> Result<f64> {
        self.ladder
            .iter()
            .copied()
            .find(|&s| s > scale_m)
            .ok_or(Error::SizeLimitExceeded {
                side_pixels: 0,
                ceiling: self.max_side_pixels,
            })
    }
}
