//! Land-cover taxonomy and classification grids

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use terrawatch_core::raster::Raster;
use terrawatch_core::{Error, Result};

/// The six land-cover classes, identified by a stable numeric id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum LandCoverClass {
    Water = 0,
    Forest = 1,
    Grassland = 2,
    Urban = 3,
    Barren = 4,
    Agriculture = 5,
}

/// Number of land-cover classes
pub const NUM_CLASSES: usize = 6;

impl LandCoverClass {
    pub const ALL: [LandCoverClass; NUM_CLASSES] = [
        LandCoverClass::Water,
        LandCoverClass::Forest,
        LandCoverClass::Grassland,
        LandCoverClass::Urban,
        LandCoverClass::Barren,
        LandCoverClass::Agriculture,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            LandCoverClass::Water => "Water",
            LandCoverClass::Forest => "Forest",
            LandCoverClass::Grassland => "Grassland",
            LandCoverClass::Urban => "Urban",
            LandCoverClass::Barren => "Barren",
            LandCoverClass::Agriculture => "Agriculture",
        }
    }

    /// Display color used by map overlays
    pub fn color(self) -> [u8; 3] {
        match self {
            LandCoverClass::Water => [52, 152, 219],
            LandCoverClass::Forest => [39, 174, 96],
            LandCoverClass::Grassland => [46, 204, 113],
            LandCoverClass::Urban => [231, 76, 60],
            LandCoverClass::Barren => [149, 165, 166],
            LandCoverClass::Agriculture => [243, 156, 18],
        }
    }
}

impl fmt::Display for LandCoverClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel count per class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassDistribution {
    counts: [usize; NUM_CLASSES],
}

impl ClassDistribution {
    /// Count labels; ids outside the taxonomy are ignored
    pub fn from_labels(labels: &[u8]) -> Self {
        let mut dist = Self::default();
        dist.extend(labels.iter().copied());
        dist
    }

    pub fn extend<I: IntoIterator<Item = u8>>(&mut self, labels: I) {
        for label in labels {
            if let Some(slot) = self.counts.get_mut(label as usize) {
                *slot += 1;
            }
        }
    }

    pub fn count(&self, class: LandCoverClass) -> usize {
        self.counts[class as usize]
    }

    pub fn counts(&self) -> &[usize; NUM_CLASSES] {
        &self.counts
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Most frequent class, lowest id on ties; `None` when empty
    pub fn dominant(&self) -> Option<LandCoverClass> {
        let best = self.counts.iter().copied().max().filter(|&c| c > 0)?;
        self.counts
            .iter()
            .position(|&c| c == best)
            .and_then(|i| LandCoverClass::from_id(i as u8))
    }
}

impl Serialize for ClassDistribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_CLASSES))?;
        for class in LandCoverClass::ALL {
            map.serialize_entry(class.name(), &self.count(class))?;
        }
        map.end()
    }
}

/// Per-pixel class labels on the grid of the source composite
#[derive(Debug, Clone)]
pub struct ClassificationGrid {
    pub raster: Raster<u8>,
    pub distribution: ClassDistribution,
}

impl ClassificationGrid {
    /// Wrap a label raster, rejecting ids outside the taxonomy
    pub fn new(raster: Raster<u8>) -> Result<Self> {
        if let Some(&bad) = raster.data().iter().find(|&&v| v as usize >= NUM_CLASSES) {
            return Err(Error::Algorithm(format!("invalid land-cover class id {}", bad)));
        }
        let mut distribution = ClassDistribution::default();
        distribution.extend(raster.data().iter().copied());
        Ok(Self {
            raster,
            distribution,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.raster.shape()
    }

    pub fn class_at(&self, row: usize, col: usize) -> Result<LandCoverClass> {
        let id = self.raster.get(row, col)?;
        LandCoverClass::from_id(id)
            .ok_or_else(|| Error::Algorithm(format!("invalid land-cover class id {}", id)))
    }
}
