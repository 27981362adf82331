//! Trained model artifacts and their persistence

use super::cnn::PatchCnn;
use super::forest::RandomForest;
use ndarray::{s, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;
use terrawatch_core::{Band, Error, ImageComposite, Result};

/// Model families the classifier can train
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    RandomForest,
    PatchCnn,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::RandomForest, ModelType::PatchCnn];

    /// Key used for persistence
    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::RandomForest => "random_forest",
            ModelType::PatchCnn => "patch_cnn",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "random_forest" | "rf" | "forest" => Ok(ModelType::RandomForest),
            "patch_cnn" | "cnn" => Ok(ModelType::PatchCnn),
            other => Err(Error::InvalidParameter {
                name: "model_type",
                value: other.to_string(),
                reason: "expected random_forest or patch_cnn".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Estimator {
    RandomForest(RandomForest),
    PatchCnn(PatchCnn),
}

/// A fitted estimator together with the band order it expects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    bands: Vec<Band>,
    estimator: Estimator,
}

impl TrainedModel {
    pub fn new(bands: Vec<Band>, estimator: Estimator) -> Self {
        Self { bands, estimator }
    }

    pub fn model_type(&self) -> ModelType {
        match self.estimator {
            Estimator::RandomForest(_) => ModelType::RandomForest,
            Estimator::PatchCnn(_) => ModelType::PatchCnn,
        }
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    /// Pixel matrix of a composite in this model's band order
    pub fn features(&self, composite: &ImageComposite) -> Result<ndarray::Array2<f64>> {
        composite.band_matrix(&self.bands)
    }

    /// Class ids for the row-major pixels in `range` of a `rows` x `cols` feature matrix
    pub fn predict_range(
        &self,
        features: ArrayView2<'_, f64>,
        rows: usize,
        cols: usize,
        range: Range<usize>,
    ) -> Result<Vec<u8>> {
        match &self.estimator {
            Estimator::RandomForest(forest) => {
                let end = range.end.min(features.nrows());
                let start = range.start.min(end);
                forest.predict(features.slice(s![start..end, ..]))
            }
            Estimator::PatchCnn(cnn) => cnn.classify_range(features, rows, cols, range),
        }
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Persistence of trained models, keyed by model type
pub trait ModelStore: Send + Sync {
    fn save(&self, model: &TrainedModel) -> Result<()>;

    /// `Ok(None)` when nothing has been saved under this type
    fn load(&self, model_type: ModelType) -> Result<Option<TrainedModel>>;
}

impl<S: ModelStore + ?Sized> ModelStore for std::sync::Arc<S> {
    fn save(&self, model: &TrainedModel) -> Result<()> {
        (**self).save(model)
    }

    fn load(&self, model_type: ModelType) -> Result<Option<TrainedModel>> {
        (**self).load(model_type)
    }
}

/// JSON files named `<model_type>.json` in one directory
#[derive(Debug, Clone)]
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, model_type: ModelType) -> PathBuf {
        self.dir.join(format!("{}.json", model_type.as_str()))
    }
}

impl ModelStore for FileModelStore {
    /// Written to a temporary file in the same directory, then renamed into
    /// place, so readers see either the previous model or the new one
    fn save(&self, model: &TrainedModel) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, model).map_err(|e| Error::Format(e.to_string()))?;
            writer.flush()?;
        }
        tmp.persist(self.path(model.model_type()))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn load(&self, model_type: ModelType) -> Result<Option<TrainedModel>> {
        let path = self.path(model_type);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&path)?);
        serde_json::from_reader(reader)
            .map(Some)
            .map_err(|e| Error::Format(format!("{}: {}", path.display(), e)))
    }
}

/// Process-local store, mostly for tests
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    models: RwLock<HashMap<ModelType, TrainedModel>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelStore for MemoryModelStore {
    fn save(&self, model: &TrainedModel) -> Result<()> {
        self.models
            .write()
            .map_err(|_| Error::Other("model store lock poisoned".into()))?
            .insert(model.model_type(), model.clone());
        Ok(())
    }

    fn load(&self, model_type: ModelType) -> Result<Option<TrainedModel>> {
        Ok(self
            .models
            .read()
            .map_err(|_| Error::Other("model store lock poisoned".into()))?
            .get(&model_type)
            .cloned())
    }
}
