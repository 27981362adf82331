//! Weakly supervised land-cover classification
//!
//! Weak labels supervise the model; training is split into
//! [`LandCoverClassifier::prepare`], [`LandCoverClassifier::split`] and
//! [`LandCoverClassifier::fit`] so callers can report progress between steps,
//! while [`LandCoverClassifier::train`] runs them back to back.

use super::cnn::{extract_patches, PatchCnn, PatchCnnParams, PatchDataset};
use super::dataset::{accuracy, evaluate, train_test_split, ClassificationMetrics, Split, DEFAULT_SEED, DEFAULT_TEST_FRACTION};
use super::forest::{RandomForest, RandomForestParams};
use super::land_cover::{ClassDistribution, ClassificationGrid};
use super::model::{Estimator, ModelStore, ModelType, TrainedModel};
use super::weak_labels::WeakLabeler;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use terrawatch_core::{Band, Error, ImageComposite, Result};
use tracing::info;

/// Training configuration for both model families
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierParams {
    pub test_fraction: f64,
    pub split_seed: u64,
    pub forest: RandomForestParams,
    pub cnn: PatchCnnParams,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            test_fraction: DEFAULT_TEST_FRACTION,
            split_seed: DEFAULT_SEED,
            forest: RandomForestParams::default(),
            cnn: PatchCnnParams::default(),
        }
    }
}

/// Raw pixel features of one image with their weak labels
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub pixels: Array2<f64>,
    pub labels: Vec<u8>,
    pub bands: Vec<Band>,
    pub rows: usize,
    pub cols: usize,
}

impl TrainingData {
    pub fn from_composite(composite: &ImageComposite, labels: Vec<u8>) -> Result<Self> {
        let (rows, cols) = composite.shape();
        if labels.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }
        Ok(Self {
            pixels: composite.pixel_matrix(),
            labels,
            bands: composite.bands(),
            rows,
            cols,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn distribution(&self) -> ClassDistribution {
        ClassDistribution::from_labels(&self.labels)
    }
}

/// Held-out split for one model family
#[derive(Debug, Clone)]
pub enum TrainingSet {
    /// Pixel indices for the forest
    Pixels(Split),
    /// Patches for the CNN, split by patch index
    Patches { dataset: PatchDataset, split: Split },
}

impl TrainingSet {
    pub fn model_type(&self) -> ModelType {
        match self {
            TrainingSet::Pixels(_) => ModelType::RandomForest,
            TrainingSet::Patches { .. } => ModelType::PatchCnn,
        }
    }

    fn split(&self) -> &Split {
        match self {
            TrainingSet::Pixels(split) | TrainingSet::Patches { split, .. } => split,
        }
    }

    pub fn train_len(&self) -> usize {
        self.split().train.len()
    }

    pub fn test_len(&self) -> usize {
        self.split().test.len()
    }

    pub fn tied_patches(&self) -> usize {
        match self {
            TrainingSet::Pixels(_) => 0,
            TrainingSet::Patches { dataset, .. } => dataset.tied,
        }
    }
}

/// Summary of one training run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingReport {
    pub model_type: ModelType,
    pub metrics: ClassificationMetrics,
    pub train_samples: usize,
    pub test_samples: usize,
    /// Patches whose majority vote was tied (CNN only)
    pub tied_patches: usize,
    pub skipped_patches: usize,
    pub label_distribution: ClassDistribution,
}

/// Trains, persists and applies land-cover models
pub struct LandCoverClassifier<S: ModelStore> {
    store: S,
    params: ClassifierParams,
    cache: RwLock<HashMap<ModelType, Arc<TrainedModel>>>,
}

impl<S: ModelStore> LandCoverClassifier<S> {
    pub fn new(store: S, params: ClassifierParams) -> Self {
        Self {
            store,
            params,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Weak-label every pixel of the composite
    pub fn prepare(&self, composite: &ImageComposite) -> Result<TrainingData> {
        let labels = WeakLabeler::new(composite)?.label_all();
        TrainingData::from_composite(composite, labels)
    }

    /// Seeded train/test split of pixels (forest) or majority-labeled patches (CNN)
    pub fn split(&self, data: &TrainingData, model_type: ModelType) -> Result<TrainingSet> {
        let p = &self.params;
        match model_type {
            ModelType::RandomForest => Ok(TrainingSet::Pixels(train_test_split(
                data.len(),
                p.test_fraction,
                p.split_seed,
            )?)),
            ModelType::PatchCnn => {
                let dataset = extract_patches(&data.labels, data.rows, data.cols, &p.cnn)?;
                let split = train_test_split(dataset.len(), p.test_fraction, p.split_seed)?;
                Ok(TrainingSet::Patches { dataset, split })
            }
        }
    }

    /// Fit on the training part of `set` and score on both parts
    pub fn fit(&self, data: &TrainingData, set: &TrainingSet) -> Result<(TrainedModel, TrainingReport)> {
        let (estimator, metrics, skipped) = match set {
            TrainingSet::Pixels(split) => {
                let (forest, metrics) = self.fit_forest(data, split)?;
                (Estimator::RandomForest(forest), metrics, 0)
            }
            TrainingSet::Patches { dataset, split } => {
                let (cnn, metrics) = self.fit_cnn(data, dataset, split)?;
                (Estimator::PatchCnn(cnn), metrics, dataset.skipped)
            }
        };

        let report = TrainingReport {
            model_type: set.model_type(),
            metrics,
            train_samples: set.train_len(),
            test_samples: set.test_len(),
            tied_patches: set.tied_patches(),
            skipped_patches: skipped,
            label_distribution: data.distribution(),
        };
        info!(
            model = %report.model_type,
            accuracy = report.metrics.accuracy,
            train = report.train_samples,
            test = report.test_samples,
            "model trained"
        );
        Ok((TrainedModel::new(data.bands.clone(), estimator), report))
    }

    fn fit_forest(&self, data: &TrainingData, split: &Split) -> Result<(RandomForest, ClassificationMetrics)> {
        let x_train = data.pixels.select(Axis(0), &split.train);
        let y_train: Vec<u8> = split.train.iter().map(|&i| data.labels[i]).collect();
        let forest = RandomForest::fit(x_train.view(), &y_train, &self.params.forest)?;

        let x_test = data.pixels.select(Axis(0), &split.test);
        let y_test: Vec<u8> = split.test.iter().map(|&i| data.labels[i]).collect();
        let predicted = forest.predict(x_test.view())?;

        let mut metrics = evaluate(&y_test, &predicted)?;
        metrics.train_accuracy = Some(accuracy(&y_train, &forest.predict(x_train.view())?));
        metrics.test_accuracy = Some(metrics.accuracy);
        Ok((forest, metrics))
    }

    fn fit_cnn(
        &self,
        data: &TrainingData,
        dataset: &PatchDataset,
        split: &Split,
    ) -> Result<(PatchCnn, ClassificationMetrics)> {
        let train = dataset.select(&split.train);
        let (cnn, report) = PatchCnn::fit(data.pixels.view(), data.cols, &train, &self.params.cnn)?;

        let test = dataset.select(&split.test);
        let predicted: Vec<u8> = test
            .patches
            .iter()
            .map(|p| cnn.predict_patch(data.pixels.view(), data.cols, p))
            .collect();

        let mut metrics = evaluate(&test.labels, &predicted)?;
        metrics.train_accuracy = Some(report.train_accuracy);
        metrics.test_accuracy = Some(metrics.accuracy);
        Ok((cnn, metrics))
    }

    /// Save to the store and make it the active model for its type
    pub fn persist(&self, model: TrainedModel) -> Result<Arc<TrainedModel>> {
        self.store.save(&model)?;
        let model = Arc::new(model);
        self.cache
            .write()
            .map_err(|_| Error::Other("model cache lock poisoned".into()))?
            .insert(model.model_type(), Arc::clone(&model));
        Ok(model)
    }

    /// Weak-label, split, fit and persist in one call
    pub fn train(&self, composite: &ImageComposite, model_type: ModelType) -> Result<TrainingReport> {
        let data = self.prepare(composite)?;
        let set = self.split(&data, model_type)?;
        let (model, report) = self.fit(&data, &set)?;
        self.persist(model)?;
        Ok(report)
    }

    /// The active model of a type, loading it from the store on first use
    pub fn model(&self, model_type: ModelType) -> Result<Arc<TrainedModel>> {
        if let Some(model) = self
            .cache
            .read()
            .map_err(|_| Error::Other("model cache lock poisoned".into()))?
            .get(&model_type)
        {
            return Ok(Arc::clone(model));
        }

        let model = self
            .store
            .load(model_type)?
            .ok_or_else(|| Error::ModelNotTrained(model_type.to_string()))?;
        let model = Arc::new(model);
        self.cache
            .write()
            .map_err(|_| Error::Other("model cache lock poisoned".into()))?
            .insert(model_type, Arc::clone(&model));
        Ok(model)
    }

    /// Per-pixel classes for a composite; fails with `ModelNotTrained` when no model exists
    pub fn classify(&self, composite: &ImageComposite, model_type: ModelType) -> Result<ClassificationGrid> {
        let model = self.model(model_type)?;
        let features = model.features(composite)?;
        let (rows, cols) = composite.shape();
        let labels = model.predict_range(features.view(), rows, cols, 0..rows * cols)?;
        ClassificationGrid::new(composite.template().derive(labels)?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::model::MemoryModelStore;
    use super::*;
    use terrawatch_core::{GeoTransform, Raster};

    /// Left half water-like, right half forest-like
    fn scene(rows: usize, cols: usize) -> ImageComposite {
        let band = |left: f64, right: f64| {
            let data = (0..rows * cols)
                .map(|i| if i % cols < cols / 2 { left } else { right })
                .collect();
            let mut r = Raster::from_vec(data, rows, cols).unwrap();
            r.set_transform(GeoTransform::new(500000.0, 4000000.0, 10.0, -10.0));
            r
        };
        ImageComposite::new(vec![
            (Band::Red, band(0.05, 0.04)),
            (Band::Green, band(0.30, 0.08)),
            (Band::Blue, band(0.10, 0.03)),
            (Band::Nir, band(0.02, 0.45)),
        ])
        .unwrap()
    }

    fn small_params() -> ClassifierParams {
        ClassifierParams {
            forest: RandomForestParams {
                n_trees: 5,
                max_depth: 5,
                ..Default::default()
            },
            cnn: PatchCnnParams {
                patch_size: 4,
                filters: 2,
                epochs: 3,
                batch_size: 4,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_untrained_fails() {
        let classifier = LandCoverClassifier::new(MemoryModelStore::new(), small_params());
        let result = classifier.classify(&scene(8, 8), ModelType::RandomForest);
        assert!(matches!(result, Err(Error::ModelNotTrained(ref m)) if m == "random_forest"));
    }

    #[test]
    fn test_train_then_classify_forest() {
        let composite = scene(10, 10);
        let classifier = LandCoverClassifier::new(MemoryModelStore::new(), small_params());
        let report = classifier.train(&composite, ModelType::RandomForest).unwrap();

        assert_eq!(report.train_samples + report.test_samples, 100);
        assert_eq!(report.test_samples, 20);
        assert!(report.metrics.accuracy > 0.99, "Expected accuracy ~1, got {}", report.metrics.accuracy);
        assert_eq!(report.label_distribution.total(), 100);

        let grid = classifier.classify(&composite, ModelType::RandomForest).unwrap();
        assert_eq!(grid.shape(), (10, 10));
        assert_eq!(grid.distribution.total(), 100);
        assert_eq!(grid.raster.transform(), composite.transform());
        assert_eq!(grid.raster.get(0, 0).unwrap(), 0);
        assert_eq!(grid.raster.get(0, 9).unwrap(), 1);
    }

    #[test]
    fn test_model_loaded_from_store() {
        let composite = scene(10, 10);
        let store = MemoryModelStore::new();
        let trainer = LandCoverClassifier::new(store, small_params());
        trainer.train(&composite, ModelType::RandomForest).unwrap();

        let saved = trainer.store().load(ModelType::RandomForest).unwrap().unwrap();
        let fresh_store = MemoryModelStore::new();
        fresh_store.save(&saved).unwrap();
        let fresh = LandCoverClassifier::new(fresh_store, small_params());
        assert!(fresh.classify(&composite, ModelType::RandomForest).is_ok());
        assert!(fresh.classify(&composite, ModelType::PatchCnn).is_err());
    }

    #[test]
    fn test_train_cnn_reports_patches() {
        let composite = scene(12, 12);
        let classifier = LandCoverClassifier::new(MemoryModelStore::new(), small_params());
        let report = classifier.train(&composite, ModelType::PatchCnn).unwrap();

        // 12x12, patch 4, stride 2 -> 5x5 anchors; the column-4 anchor straddles the boundary
        assert_eq!(report.train_samples + report.test_samples, 25);
        assert_eq!(report.tied_patches, 5);
        assert!(report.metrics.train_accuracy.is_some());

        let grid = classifier.classify(&composite, ModelType::PatchCnn).unwrap();
        assert_eq!(grid.distribution.total(), 144);
    }
}
