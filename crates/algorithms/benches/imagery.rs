//! Benchmarks for imagery and classification hot paths

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use terrawatch_algorithms::classification::{RandomForest, RandomForestParams, WeakLabeler};
use terrawatch_algorithms::imagery::ndvi;
use terrawatch_core::{Band, GeoTransform, ImageComposite, Raster};

fn create_band(size: usize, base: f64) -> Raster<f64> {
    let mut r = Raster::new(size, size);
    r.set_transform(GeoTransform::new(0.0, size as f64, 1.0, -1.0));
    for row in 0..size {
        for col in 0..size {
            let v = base + ((row * 7 + col * 13) % 200) as f64;
            r.set(row, col, v).unwrap();
        }
    }
    r
}

fn create_composite(size: usize) -> ImageComposite {
    ImageComposite::new(vec![
        (Band::Red, create_band(size, 100.0)),
        (Band::Green, create_band(size, 120.0)),
        (Band::Blue, create_band(size, 80.0)),
        (Band::Nir, create_band(size, 300.0)),
    ])
    .unwrap()
}

fn bench_ndvi(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/ndvi");
    for size in [256, 512, 1024, 2048] {
        let nir = create_band(size, 300.0);
        let red = create_band(size, 100.0);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| ndvi(black_box(&nir), black_box(&red)).unwrap())
        });
    }
    group.finish();
}

fn bench_weak_labels(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification/weak_labels");
    for size in [256, 512, 1024] {
        let composite = create_composite(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| WeakLabeler::new(black_box(&composite)).unwrap().label_all())
        });
    }
    group.finish();
}

fn bench_forest_predict(c: &mut Criterion) {
    let composite = create_composite(256);
    let labeler = WeakLabeler::new(&composite).unwrap();
    let labels = labeler.label_all();
    let pixels = composite.pixel_matrix();
    let params = RandomForestParams {
        n_trees: 20,
        max_depth: 10,
        ..Default::default()
    };
    let forest = RandomForest::fit(pixels.view(), &labels, &params).unwrap();

    c.bench_function("classification/forest_predict_256", |b| {
        b.iter(|| forest.predict(black_box(pixels.view())).unwrap())
    });
}

criterion_group!(benches, bench_ndvi, bench_weak_labels, bench_forest_predict);
criterion_main!(benches);
