//! The staged training workflow behind a realtime session
//!
//! `loading → labeling → splitting → training → classifying → saving → tiles → complete`
//!
//! Labeling and classification run over a [`ChunkPlan`] so one event is
//! published per chunk; the final chunk of each carries the running class
//! distribution. Cancellation is observed between chunks and between stages.

use super::events::Stage;
use super::reporter::ProgressReporter;
use super::visualization::{render_overlay, OverlayMetadata};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use terrawatch_algorithms::classification::{
    ClassDistribution, ClassificationGrid, ClassificationMetrics, ClassifierParams, LandCoverClassifier,
    ModelStore, ModelType, TrainingData, TrainingReport, WeakLabeler, LABEL_BANDS,
};
use terrawatch_core::io::RasterStore;
use terrawatch_core::{Band, Error, Result};
use terrawatch_parallel::ChunkPlan;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One session's input
#[derive(Debug, Clone)]
pub struct TrainingRequest {
    pub session_id: String,
    pub image_path: PathBuf,
    /// Where the classified GeoTIFF goes; defaults to `<output_dir>/classified_<session>.tif`
    pub output_path: Option<PathBuf>,
    pub model_type: ModelType,
    /// Band order of the stored image
    pub bands: Vec<Band>,
}

impl TrainingRequest {
    pub fn new(session_id: impl Into<String>, image_path: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            image_path: image_path.into(),
            output_path: None,
            model_type: ModelType::RandomForest,
            bands: LABEL_BANDS.to_vec(),
        }
    }

    pub fn with_model_type(mut self, model_type: ModelType) -> Self {
        self.model_type = model_type;
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_bands(mut self, bands: Vec<Band>) -> Self {
        self.bands = bands;
        self
    }
}

/// Storage and tuning shared by every session
#[derive(Clone)]
pub struct PipelineContext {
    pub raster_store: Arc<dyn RasterStore>,
    pub model_store: Arc<dyn ModelStore>,
    pub classifier_params: ClassifierParams,
    pub chunk_count: usize,
    pub output_dir: PathBuf,
    pub tiles_dir: PathBuf,
}

/// Products of a completed session
#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutcome {
    pub metrics: ClassificationMetrics,
    pub class_distribution: ClassDistribution,
    pub output_path: PathBuf,
    pub tile_path: PathBuf,
    pub metadata: OverlayMetadata,
    #[serde(skip)]
    pub report: TrainingReport,
}

pub struct TrainingPipeline {
    ctx: PipelineContext,
}

impl TrainingPipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Run every stage, ending with exactly one `complete` or `error` event
    pub fn run(
        &self,
        request: &TrainingRequest,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<TrainingOutcome> {
        match self.execute(request, reporter, cancel) {
            Ok(outcome) => {
                reporter.complete(
                    "Workflow complete!",
                    json!({
                        "metrics": outcome.metrics,
                        "class_distribution": outcome.class_distribution,
                        "output_path": outcome.output_path,
                        "tile_path": outcome.tile_path,
                        "metadata": outcome.metadata,
                    }),
                );
                info!(session_id = %request.session_id, "workflow complete");
                Ok(outcome)
            }
            Err(e) => {
                reporter.fail(&e);
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        request: &TrainingRequest,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<TrainingOutcome> {
        let classifier = LandCoverClassifier::new(
            Arc::clone(&self.ctx.model_store),
            self.ctx.classifier_params.clone(),
        );

        // Loading
        checkpoint(cancel)?;
        let mut stage = reporter.stage(Stage::Loading);
        stage.report(0, "Loading satellite image...");
        let composite = self
            .ctx
            .raster_store
            .read_composite(&request.image_path, &request.bands)?;
        let (rows, cols) = composite.shape();
        stage.report(
            50,
            format!(
                "Image loaded: {}x{} pixels, {} bands",
                cols,
                rows,
                composite.band_count()
            ),
        );
        stage.report(75, "Preparing training data...");
        let labeler = WeakLabeler::new(&composite)?;
        stage.finish("Data preparation complete!");

        // Labeling
        let total = rows * cols;
        let plan = ChunkPlan::new(total, self.ctx.chunk_count);
        let mut stage = reporter.stage(Stage::Labeling);
        let mut labels = Vec::with_capacity(total);
        let mut distribution = ClassDistribution::default();
        for chunk in plan.iter() {
            checkpoint(cancel)?;
            let part = labeler.label_range(chunk.range.clone());
            distribution.extend(part.iter().copied());
            labels.extend(part);

            let message = pixel_count_message("Labeled", chunk.range.end, total);
            if chunk.progress == 100 {
                stage.report_with(100, message, json!({ "class_distribution": distribution }));
            } else {
                stage.report(chunk.progress, message);
            }
        }
        stage.finish_with(
            pixel_count_message("Labeled", labels.len(), total),
            json!({ "class_distribution": distribution }),
        );
        let data = TrainingData::from_composite(&composite, labels)?;

        // Splitting
        checkpoint(cancel)?;
        let mut stage = reporter.stage(Stage::Splitting);
        stage.report(0, "Splitting data into train/test sets...");
        let set = classifier.split(&data, request.model_type)?;
        stage.finish(format!(
            "Train: {} samples, Test: {} samples",
            set.train_len(),
            set.test_len()
        ));

        // Training
        checkpoint(cancel)?;
        let mut stage = reporter.stage(Stage::Training);
        stage.report(0, format!("Initializing {} model...", request.model_type));
        stage.report(25, "Training model (this may take a few minutes)...");
        let (model, report) = classifier.fit(&data, &set)?;
        checkpoint(cancel)?;
        stage.report(75, "Model training complete! Evaluating...");
        let model = classifier.persist(model)?;
        stage.finish_with(
            "Model evaluation complete!",
            json!({ "metrics": report.metrics }),
        );

        // Classifying
        let features = model.features(&composite)?;
        let mut stage = reporter.stage(Stage::Classifying);
        let mut predicted = Vec::with_capacity(total);
        let mut classified = ClassDistribution::default();
        for chunk in plan.iter() {
            checkpoint(cancel)?;
            let part = model.predict_range(features.view(), rows, cols, chunk.range.clone())?;
            classified.extend(part.iter().copied());
            predicted.extend(part);

            let message = pixel_count_message("Classified", chunk.range.end, total);
            if chunk.progress == 100 {
                stage.report_with(100, message, json!({ "class_distribution": classified }));
            } else {
                stage.report(chunk.progress, message);
            }
        }
        stage.finish_with(
            pixel_count_message("Classified", predicted.len(), total),
            json!({ "class_distribution": classified }),
        );
        let grid = ClassificationGrid::new(composite.template().derive(predicted)?)?;

        // Saving
        checkpoint(cancel)?;
        let output_path = request.output_path.clone().unwrap_or_else(|| {
            self.ctx
                .output_dir
                .join(format!("classified_{}.tif", sanitize_id(&request.session_id)))
        });
        let mut stage = reporter.stage(Stage::Saving);
        stage.report(0, "Saving classified image...");
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.ctx.raster_store.write_classes(&grid.raster, &output_path)?;
        stage.finish(format!("Classified image saved to {}", output_path.display()));

        // Tiles
        checkpoint(cancel)?;
        let mut stage = reporter.stage(Stage::Tiles);
        stage.report(0, "Generating map tiles...");
        let tile_dir = session_tile_dir(&self.ctx.tiles_dir, &request.session_id);
        let (tile_path, metadata) = render_overlay(&grid, &tile_dir)?;
        stage.finish_with(
            "Map tiles generated!",
            json!({ "tile_path": tile_path, "metadata": metadata }),
        );

        Ok(TrainingOutcome {
            metrics: report.metrics.clone(),
            class_distribution: grid.distribution,
            output_path,
            tile_path,
            metadata,
            report,
        })
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Session ids become path components; keep `[A-Za-z0-9_-]` only
pub fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}

pub fn session_tile_dir(tiles_dir: &Path, session_id: &str) -> PathBuf {
    tiles_dir.join(sanitize_id(session_id))
}

fn pixel_count_message(verb: &str, done: usize, total: usize) -> String {
    format!("{} {} / {} pixels", verb, group_thousands(done), group_thousands(total))
}

/// `1234567` → `1,234,567`
fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::reporter::tests::RecordingSink;
    use super::*;
    use std::sync::Mutex;
    use terrawatch_algorithms::classification::{MemoryModelStore, RandomForestParams};
    use terrawatch_core::{GeoTransform, ImageComposite, Raster};

    /// Serves one in-memory composite and records written class rasters
    struct SceneStore {
        composite: ImageComposite,
        written: Mutex<Vec<PathBuf>>,
    }

    impl RasterStore for SceneStore {
        fn read_composite(&self, _path: &Path, bands: &[Band]) -> Result<ImageComposite> {
            let rasters = bands
                .iter()
                .map(|&b| self.composite.band(b).map(|r| (b, r.clone())))
                .collect::<Result<Vec<_>>>()?;
            ImageComposite::new(rasters)
        }

        fn write_raster(&self, _raster: &Raster<f64>, path: &Path) -> Result<()> {
            self.written.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        fn write_classes(&self, _raster: &Raster<u8>, path: &Path) -> Result<()> {
            self.written.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    /// Top half water-like, bottom half forest-like
    fn scene(rows: usize, cols: usize) -> ImageComposite {
        let band = |water: f64, forest: f64| {
            let data = (0..rows * cols)
                .map(|i| if i / cols < rows / 2 { water } else { forest })
                .collect();
            let mut r = Raster::from_vec(data, rows, cols).unwrap();
            r.set_transform(GeoTransform::new(-3.8, 40.5, 0.001, -0.001));
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

    fn pipeline(dir: &Path, rows: usize, cols: usize) -> (TrainingPipeline, Arc<SceneStore>) {
        let store = Arc::new(SceneStore {
            composite: scene(rows, cols),
            written: Mutex::new(Vec::new()),
        });
        let mut params = ClassifierParams::default();
        params.forest = RandomForestParams {
            n_trees: 5,
            ..RandomForestParams::default()
        };
        let ctx = PipelineContext {
            raster_store: store.clone(),
            model_store: Arc::new(MemoryModelStore::default()),
            classifier_params: params,
            chunk_count: 4,
            output_dir: dir.join("exports"),
            tiles_dir: dir.join("tiles"),
        };
        (TrainingPipeline::new(ctx), store)
    }

    #[test]
    fn stages_run_in_order_with_one_terminal_event() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, store) = pipeline(dir.path(), 10, 10);
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::new("abc", sink.clone());

        let outcome = pipeline
            .run(&TrainingRequest::new("abc", "scene.tif"), &reporter, &CancellationToken::new())
            .unwrap();

        let events = sink.events();
        let stages: Vec<Stage> = events.iter().map(|e| e.stage).collect();
        assert!(stages.windows(2).all(|w| w[0] <= w[1]), "stages out of order: {:?}", stages);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(events.last().unwrap().stage, Stage::Complete);

        let labeling: Vec<_> = events.iter().filter(|e| e.stage == Stage::Labeling).collect();
        assert_eq!(labeling.len(), 4);
        assert_eq!(labeling[3].progress, 100);
        assert_eq!(labeling[3].message, "Labeled 100 / 100 pixels");
        let dist = &labeling[3].data.as_ref().unwrap()["class_distribution"];
        assert_eq!(dist["Water"], 50);
        assert_eq!(dist["Forest"], 50);

        assert_eq!(
            events.iter().filter(|e| e.stage == Stage::Classifying).count(),
            4
        );
        assert_eq!(outcome.class_distribution.total(), 100);
        assert_eq!(outcome.metadata.size.width, 10);
        assert!(outcome.tile_path.starts_with(dir.path().join("tiles").join("abc")));
        assert_eq!(
            store.written.lock().unwrap().as_slice(),
            &[dir.path().join("exports").join("classified_abc.tif")]
        );

        let complete = events.last().unwrap().data.as_ref().unwrap();
        for key in ["metrics", "class_distribution", "output_path", "tile_path", "metadata"] {
            assert!(complete.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn cancelled_token_emits_single_error() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path(), 6, 6);
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::new("c", sink.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline
            .run(&TrainingRequest::new("c", "scene.tif"), &reporter, &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, Stage::Error);
    }

    #[test]
    fn missing_band_fails_in_loading() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path(), 6, 6);
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::new("m", sink.clone());
        let request = TrainingRequest::new("m", "scene.tif").with_bands(vec![Band::Red, Band::Swir]);

        let err = pipeline.run(&request, &reporter, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::MissingBand(_)), "got {:?}", err);

        let events = sink.events();
        assert_eq!(events.last().unwrap().stage, Stage::Error);
        assert!(events.iter().all(|e| e.stage == Stage::Loading || e.stage == Stage::Error));
    }

    #[test]
    fn thousands_are_grouped() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn ids_are_path_safe() {
        assert_eq!(sanitize_id("a/b..c"), "a_b__c");
        assert_eq!(sanitize_id(""), "session");
        assert_eq!(sanitize_id("run-1_x"), "run-1_x");
    }
}
