//! # Terrawatch Algorithms
//!
//! Raster analysis for satellite composites.
//!
//! ## Modules
//!
//! - **scale**: export resolution under a per-side pixel ceiling
//! - **imagery**: spectral indices, region statistics, change detection,
//!   vegetation and moisture analysis
//! - **classification**: weak labeling, random forest and patch CNN
//!   training, metrics, model persistence
//! - **rules**: ordered `(predicate, label)` decision lists

mod maybe_rayon;

pub mod classification;
pub mod imagery;
pub mod rules;
pub mod scale;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classification::{
        generate_weak_labels, ClassDistribution, ClassificationGrid, ClassificationMetrics,
        FileModelStore, LandCoverClass, LandCoverClassifier, MemoryModelStore, ModelStore,
        ModelType, TrainingReport,
    };
    pub use crate::imagery::{
        detect_forest_change, detect_urban_sprawl, detect_water, msi, ndbi, ndmi, ndvi, ndwi,
        normalized_difference, reduce_region, AreaChange, RegionStats, SpectralIndex,
    };
    pub use crate::rules::DecisionList;
    pub use crate::scale::{ScaleChoice, ScaleSelector};
    pub use terrawatch_core::prelude::*;
}
