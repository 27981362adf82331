//! End-to-end checks across scale selection, indices, change detection and
//! classification on synthetic scenes.

use terrawatch_algorithms::classification::{
    weak_label_rules, FileModelStore, LandCoverClass, LandCoverClassifier, ModelType,
    PixelFeatures, RandomForestParams,
};
use terrawatch_algorithms::imagery::{detect_forest_change, AreaChange, SpectralIndex};
use terrawatch_algorithms::scale::ScaleSelector;
use terrawatch_algorithms::classification::ClassifierParams;
use terrawatch_core::io::{write_multiband, GeoTiffStore, RasterStore};
use terrawatch_core::{Band, Error, GeoTransform, ImageComposite, Raster, CRS};

const ROWS: usize = 20;
const COLS: usize = 20;

fn projected(data: Vec<f64>) -> Raster<f64> {
    let mut r = Raster::from_vec(data, ROWS, COLS).unwrap();
    r.set_transform(GeoTransform::new(350000.0, 6300000.0, 10.0, -10.0));
    r.set_crs(Some(CRS::from_epsg(32719)));
    r
}

/// Three vertical strips: water, forest, bright bare ground
fn strip_scene() -> ImageComposite {
    let strip = |water: f64, forest: f64, bare: f64| {
        projected(
            (0..ROWS * COLS)
                .map(|i| match i % COLS {
                    c if c < 7 => water,
                    c if c < 14 => forest,
                    _ => bare,
                })
                .collect(),
        )
    };
    ImageComposite::new(vec![
        (Band::Red, strip(0.03, 0.04, 0.30)),
        (Band::Green, strip(0.20, 0.08, 0.28)),
        (Band::Blue, strip(0.08, 0.03, 0.26)),
        (Band::Nir, strip(0.01, 0.50, 0.32)),
    ])
    .unwrap()
}

// ---------------------------------------------------------------------------
// Scale and change detection
// ---------------------------------------------------------------------------

#[test]
fn small_aoi_gets_finest_scale() {
    let choice = ScaleSelector::default().select(25.0).unwrap();
    assert_eq!(choice.scale_m, 10.0);
    assert!((choice.min_scale_m - 5000.0 / 30000.0).abs() < 1e-12);
}

#[test]
fn forest_change_percentage() {
    let change = AreaChange::new(450.2, 425.8);
    assert!((change.delta_km2 + 24.4).abs() < 1e-9, "Expected -24.4, got {}", change.delta_km2);
    assert!(
        (change.percentage_change + 5.42).abs() < 0.01,
        "Expected ~-5.42, got {}",
        change.percentage_change
    );
}

#[test]
fn clearing_a_forest_strip_is_reported_as_loss() {
    let old = strip_scene();
    let cleared: Vec<(Band, Raster<f64>)> = old
        .rasters()
        .map(|(band, raster)| {
            let data = raster
                .data()
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    let col = i % COLS;
                    if (7..10).contains(&col) {
                        if band == Band::Nir { 0.10 } else { 0.12 }
                    } else {
                        v
                    }
                })
                .collect();
            (band, raster.derive(data).unwrap())
        })
        .collect();
    let new = ImageComposite::new(cleared).unwrap();

    let change = detect_forest_change(&old, &new).unwrap();
    // three columns of 20 pixels at 100 m² each
    let expected = 3.0 * 20.0 * 100.0 / 1e6;
    assert!((change.loss_km2 - expected).abs() < 1e-12, "Expected {}, got {}", expected, change.loss_km2);
    assert_eq!(change.gain_km2, 0.0);
    assert!(change.change.percentage_change < 0.0);
}

// ---------------------------------------------------------------------------
// Weak labels and classification
// ---------------------------------------------------------------------------

#[test]
fn water_rule_precedes_barren() {
    let features = PixelFeatures {
        red: 0.1,
        green: 0.1,
        blue: 0.1,
        nir: 0.1,
        ndvi: 0.05,
        ndwi: 0.5,
    };
    let rules = weak_label_rules();
    assert_eq!(rules.evaluate(&features), LandCoverClass::Water);
    // Barren would also match on its own
    assert!(rules.rules().iter().any(|r| r.label == LandCoverClass::Barren && (r.predicate)(&features)));
}

#[test]
fn ndvi_matches_hand_computation() {
    let ndvi = SpectralIndex::Ndvi.compute(&strip_scene()).unwrap();
    let v = ndvi.raster.get(0, 8).unwrap();
    let expected = (0.50 - 0.04) / (0.50 + 0.04 + 1e-8);
    assert!((v - expected).abs() < 1e-12, "Expected {}, got {}", expected, v);
}

#[test]
fn geotiff_scene_trains_and_classifies() {
    let dir = tempfile::tempdir().unwrap();
    let scene_path = dir.path().join("scene.tif");
    let scene = strip_scene();
    let bands: Vec<&Raster<f64>> = scene.rasters().map(|(_, r)| r).collect();
    write_multiband(&bands, &scene_path).unwrap();

    let order = [Band::Red, Band::Green, Band::Blue, Band::Nir];
    let composite = GeoTiffStore.read_composite(&scene_path, &order).unwrap();

    let params = ClassifierParams {
        forest: RandomForestParams {
            n_trees: 10,
            max_depth: 8,
            ..Default::default()
        },
        ..Default::default()
    };
    let store = FileModelStore::new(dir.path().join("models"));
    let classifier = LandCoverClassifier::new(store.clone(), params.clone());

    let untrained = classifier.classify(&composite, ModelType::RandomForest);
    assert!(matches!(untrained, Err(Error::ModelNotTrained(_))));

    let report = classifier.train(&composite, ModelType::RandomForest).unwrap();
    assert!(report.metrics.accuracy > 0.95, "Expected accuracy > 0.95, got {}", report.metrics.accuracy);
    assert!(store.path(ModelType::RandomForest).exists());

    // a fresh classifier picks the model up from disk
    let reloaded = LandCoverClassifier::new(store, params);
    let grid = reloaded.classify(&composite, ModelType::RandomForest).unwrap();
    assert_eq!(grid.class_at(5, 2).unwrap(), LandCoverClass::Water);
    assert_eq!(grid.class_at(5, 10).unwrap(), LandCoverClass::Forest);
    assert_eq!(grid.distribution.total(), ROWS * COLS);

    let out = dir.path().join("classified.tif");
    GeoTiffStore.write_classes(&grid.raster, &out).unwrap();
    assert!(out.exists());
}
