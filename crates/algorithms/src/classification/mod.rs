//! Land-cover classification
//!
//! - **Weak labels**: ordered threshold table over normalized bands and indices
//! - **Random forest**: CART ensemble over per-pixel band vectors
//! - **Patch CNN**: small convolutional network over square patches
//! - **Metrics**: accuracy, weighted precision/recall/F1, confusion matrix
//! - **Model store**: persistence keyed by model type

mod classifier;
mod cnn;
mod dataset;
mod forest;
mod land_cover;
mod model;
mod weak_labels;

pub use classifier::{ClassifierParams, LandCoverClassifier, TrainingData, TrainingReport, TrainingSet};
pub use cnn::{
    extract_patches, patch_majority, PatchCnn, PatchCnnParams, PatchDataset, PatchLabel,
    PatchTrainingReport, TieBreak,
};
pub use dataset::{
    accuracy, evaluate, train_test_split, ClassificationMetrics, Split, DEFAULT_SEED,
    DEFAULT_TEST_FRACTION,
};
pub use forest::{DecisionTree, RandomForest, RandomForestParams};
pub use land_cover::{ClassDistribution, ClassificationGrid, LandCoverClass, NUM_CLASSES};
pub use model::{Estimator, FileModelStore, MemoryModelStore, ModelStore, ModelType, TrainedModel};
pub use weak_labels::{
    generate_weak_labels, weak_label_rules, BandNormalizer, PixelFeatures, WeakLabeler, LABEL_BANDS,
};
