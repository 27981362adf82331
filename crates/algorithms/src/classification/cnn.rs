//! Patch-based convolutional classifier
//!
//! Training samples are square patches cut with half-patch stride, each
//! labeled by the majority weak label of its pixels. The network is a single
//! 3x3 convolution (same padding) with ReLU, global average pooling and a
//! softmax dense layer, trained by mini-batch SGD on cross-entropy.
//! Inference tiles the image with non-overlapping patches (the last row and
//! column clamped to the edge) and assigns each tile's class to its pixels.

use super::land_cover::{LandCoverClass, NUM_CLASSES};
use super::weak_labels::BandNormalizer;
use crate::maybe_rayon::*;
use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use terrawatch_core::{Error, Result};
use terrawatch_parallel::{Patch, PatchIterator};
use tracing::warn;

/// What to do with a patch whose pixel labels tie for the majority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Take the tied class with the lowest id
    #[default]
    LowestClassId,
    /// Leave the patch out of training
    Skip,
}

/// Majority label of a patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchLabel {
    Majority(LandCoverClass),
    /// Several classes share the highest count, lowest id first
    Tie(Vec<LandCoverClass>),
}

impl PatchLabel {
    pub fn resolve(&self, policy: TieBreak) -> Option<LandCoverClass> {
        match (self, policy) {
            (PatchLabel::Majority(class), _) => Some(*class),
            (PatchLabel::Tie(classes), TieBreak::LowestClassId) => classes.first().copied(),
            (PatchLabel::Tie(_), TieBreak::Skip) => None,
        }
    }
}

/// Majority vote over class ids; ids outside the taxonomy are ignored
pub fn patch_majority<I: IntoIterator<Item = u8>>(labels: I) -> Option<PatchLabel> {
    let mut counts = [0usize; NUM_CLASSES];
    for label in labels {
        if let Some(c) = counts.get_mut(label as usize) {
            *c += 1;
        }
    }
    let best = counts.iter().copied().max().filter(|&c| c > 0)?;
    let winners: Vec<LandCoverClass> = LandCoverClass::ALL
        .into_iter()
        .filter(|class| counts[class.id() as usize] == best)
        .collect();
    match winners.as_slice() {
        [single] => Some(PatchLabel::Majority(*single)),
        _ => Some(PatchLabel::Tie(winners)),
    }
}

/// Parameters for patch extraction and CNN training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchCnnParams {
    pub patch_size: usize,
    /// Distance between patch anchors; `None` uses half the patch size
    pub stride: Option<usize>,
    pub filters: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub tie_break: TieBreak,
}

impl Default for PatchCnnParams {
    fn default() -> Self {
        Self {
            patch_size: 32,
            stride: None,
            filters: 8,
            epochs: 20,
            batch_size: 32,
            learning_rate: 0.05,
            seed: super::DEFAULT_SEED,
            tie_break: TieBreak::LowestClassId,
        }
    }
}

impl PatchCnnParams {
    pub fn effective_stride(&self) -> usize {
        self.stride.unwrap_or(self.patch_size / 2).max(1)
    }
}

/// Labeled training patches
#[derive(Debug, Clone, Default)]
pub struct PatchDataset {
    pub patches: Vec<Patch>,
    pub labels: Vec<u8>,
    /// Patches whose majority vote was tied
    pub tied: usize,
    /// Tied patches dropped under [`TieBreak::Skip`]
    pub skipped: usize,
}

impl PatchDataset {
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Subset by index, keeping tie counters
    pub fn select(&self, indices: &[usize]) -> PatchDataset {
        PatchDataset {
            patches: indices.iter().map(|&i| self.patches[i]).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            tied: self.tied,
            skipped: self.skipped,
        }
    }
}

/// Cut strided patches from a row-major label grid and label each by majority
pub fn extract_patches(labels: &[u8], rows: usize, cols: usize, params: &PatchCnnParams) -> Result<PatchDataset> {
    if labels.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut dataset = PatchDataset::default();
    for patch in PatchIterator::strided(rows, cols, params.patch_size, params.effective_stride()) {
        let Some(vote) = patch_majority(patch.cells().map(|(r, c)| labels[r * cols + c])) else {
            continue;
        };
        if matches!(vote, PatchLabel::Tie(_)) {
            dataset.tied += 1;
        }
        match vote.resolve(params.tie_break) {
            Some(class) => {
                dataset.patches.push(patch);
                dataset.labels.push(class.id());
            }
            None => dataset.skipped += 1,
        }
    }

    if dataset.tied > 0 {
        warn!(
            tied = dataset.tied,
            skipped = dataset.skipped,
            policy = ?params.tie_break,
            "patch majority vote was ambiguous"
        );
    }
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Gradients {
    conv_w: Vec<f64>,
    conv_b: Vec<f64>,
    dense_w: Vec<f64>,
    dense_b: Vec<f64>,
    loss: f64,
    correct: usize,
}

impl Gradients {
    fn zeros(net: &PatchCnn) -> Self {
        Self {
            conv_w: vec![0.0; net.conv_w.len()],
            conv_b: vec![0.0; net.conv_b.len()],
            dense_w: vec![0.0; net.dense_w.len()],
            dense_b: vec![0.0; net.dense_b.len()],
            loss: 0.0,
            correct: 0,
        }
    }

    fn add(mut self, other: Gradients) -> Self {
        let pairs = [
            (&mut self.conv_w, &other.conv_w),
            (&mut self.conv_b, &other.conv_b),
            (&mut self.dense_w, &other.dense_w),
            (&mut self.dense_b, &other.dense_b),
        ];
        for (dst, src) in pairs {
            for (a, b) in dst.iter_mut().zip(src) {
                *a += b;
            }
        }
        self.loss += other.loss;
        self.correct += other.correct;
        self
    }
}

struct Activations {
    /// Pre-activation convolution output, filter-major
    z: Vec<f64>,
    pooled: Vec<f64>,
    probs: [f64; NUM_CLASSES],
}

/// Outcome of CNN training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchTrainingReport {
    pub patches: usize,
    pub epochs: usize,
    pub final_loss: f64,
    pub train_accuracy: f64,
}

/// Fitted patch classifier with the normalization it was trained under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchCnn {
    bands: usize,
    filters: usize,
    patch_size: usize,
    /// [filter][band][3][3]
    conv_w: Vec<f64>,
    conv_b: Vec<f64>,
    /// [class][filter]
    dense_w: Vec<f64>,
    dense_b: Vec<f64>,
    normalizer: BandNormalizer,
}

impl PatchCnn {
    fn init(bands: usize, params: &PatchCnnParams, normalizer: BandNormalizer, rng: &mut StdRng) -> Self {
        let f = params.filters;
        let conv_scale = (6.0 / (bands * 9) as f64).sqrt();
        let dense_scale = (6.0 / (f + NUM_CLASSES) as f64).sqrt();
        Self {
            bands,
            filters: f,
            patch_size: params.patch_size,
            conv_w: (0..f * bands * 9).map(|_| rng.gen_range(-conv_scale..conv_scale)).collect(),
            conv_b: vec![0.0; f],
            dense_w: (0..NUM_CLASSES * f).map(|_| rng.gen_range(-dense_scale..dense_scale)).collect(),
            dense_b: vec![0.0; NUM_CLASSES],
            normalizer,
        }
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub fn band_count(&self) -> usize {
        self.bands
    }

    /// Train on labeled patches of a raw pixel-by-band matrix of a `rows` x `cols` image
    pub fn fit(
        pixels: ArrayView2<'_, f64>,
        cols: usize,
        dataset: &PatchDataset,
        params: &PatchCnnParams,
    ) -> Result<(Self, PatchTrainingReport)> {
        if dataset.is_empty() {
            return Err(Error::TrainingFailure(format!(
                "no training patches of size {} (image too small or every patch skipped)",
                params.patch_size
            )));
        }
        if params.filters == 0 || params.batch_size == 0 || params.learning_rate <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "patch_cnn",
                value: format!("{:?}", params),
                reason: "filters, batch size and learning rate must be positive".into(),
            });
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut net = Self::init(pixels.ncols(), params, BandNormalizer::fit(pixels), &mut rng);

        let inputs: Vec<Vec<f64>> = dataset
            .patches
            .par_iter()
            .map(|p| net.patch_input(pixels, cols, p))
            .collect();

        let mut order: Vec<usize> = (0..inputs.len()).collect();
        let mut report = PatchTrainingReport {
            patches: inputs.len(),
            epochs: params.epochs,
            final_loss: f64::NAN,
            train_accuracy: 0.0,
        };

        for epoch in 0..params.epochs {
            order.shuffle(&mut rng);
            let (mut loss, mut correct) = (0.0, 0usize);
            for batch in order.chunks(params.batch_size) {
                let grads = batch
                    .par_iter()
                    .map(|&i| net.sample_gradients(&inputs[i], dataset.labels[i]))
                    .collect::<Vec<_>>()
                    .into_iter()
                    .fold(Gradients::zeros(&net), Gradients::add);
                loss += grads.loss;
                correct += grads.correct;
                net.apply(&grads, params.learning_rate / batch.len() as f64);
            }
            report.final_loss = loss / inputs.len() as f64;
            report.train_accuracy = correct as f64 / inputs.len() as f64;
            tracing::debug!(epoch, loss = report.final_loss, accuracy = report.train_accuracy, "cnn epoch");
        }

        Ok((net, report))
    }

    /// Normalized band-major input for one patch; NaN becomes 0
    fn patch_input(&self, pixels: ArrayView2<'_, f64>, cols: usize, patch: &Patch) -> Vec<f64> {
        let p = self.patch_size;
        let mut input = Vec::with_capacity(self.bands * p * p);
        for band in 0..self.bands {
            for (r, c) in patch.cells() {
                let v = self.normalizer.scale(band, pixels[[r * cols + c, band]]);
                input.push(if v.is_finite() { v } else { 0.0 });
            }
        }
        input
    }

    fn forward(&self, input: &[f64]) -> Activations {
        let p = self.patch_size;
        let area = p * p;
        let mut z = vec![0.0; self.filters * area];

        for f in 0..self.filters {
            let out = &mut z[f * area..(f + 1) * area];
            out.iter_mut().for_each(|v| *v = self.conv_b[f]);
            for b in 0..self.bands {
                let x = &input[b * area..(b + 1) * area];
                let w = &self.conv_w[(f * self.bands + b) * 9..(f * self.bands + b + 1) * 9];
                for i in 0..p {
                    for j in 0..p {
                        let mut acc = 0.0;
                        for di in 0..3 {
                            let Some(ii) = (i + di).checked_sub(1).filter(|&ii| ii < p) else {
                                continue;
                            };
                            for dj in 0..3 {
                                if let Some(jj) = (j + dj).checked_sub(1).filter(|&jj| jj < p) {
                                    acc += w[di * 3 + dj] * x[ii * p + jj];
                                }
                            }
                        }
                        out[i * p + j] += acc;
                    }
                }
            }
        }

        let pooled: Vec<f64> = z
            .chunks(area)
            .map(|zf| zf.iter().map(|&v| v.max(0.0)).sum::<f64>() / area as f64)
            .collect();

        let mut logits = [0.0; NUM_CLASSES];
        for (c, logit) in logits.iter_mut().enumerate() {
            *logit = self.dense_b[c]
                + pooled
                    .iter()
                    .enumerate()
                    .map(|(f, &g)| self.dense_w[c * self.filters + f] * g)
                    .sum::<f64>();
        }
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut probs = logits.map(|l| (l - max).exp());
        let total: f64 = probs.iter().sum();
        probs.iter_mut().for_each(|v| *v /= total);

        Activations { z, pooled, probs }
    }

    fn sample_gradients(&self, input: &[f64], target: u8) -> Gradients {
        let p = self.patch_size;
        let area = p * p;
        let act = self.forward(input);
        let mut g = Gradients::zeros(self);

        let t = target as usize;
        g.loss = -(act.probs[t] + 1e-12).ln();
        g.correct = usize::from(argmax(&act.probs) == t);

        let mut dlogits = act.probs;
        dlogits[t] -= 1.0;

        let mut dpool = vec![0.0; self.filters];
        for (c, &dl) in dlogits.iter().enumerate() {
            g.dense_b[c] = dl;
            for f in 0..self.filters {
                g.dense_w[c * self.filters + f] = dl * act.pooled[f];
                dpool[f] += self.dense_w[c * self.filters + f] * dl;
            }
        }

        // d(pool)/dz is 1/area on active units, so every active unit shares one gradient
        for f in 0..self.filters {
            let scale = dpool[f] / area as f64;
            if scale == 0.0 {
                continue;
            }
            let zf = &act.z[f * area..(f + 1) * area];
            let active = zf.iter().filter(|&&v| v > 0.0).count();
            g.conv_b[f] = scale * active as f64;

            for b in 0..self.bands {
                let x = &input[b * area..(b + 1) * area];
                for di in 0..3 {
                    for dj in 0..3 {
                        let mut acc = 0.0;
                        for i in 0..p {
                            let Some(ii) = (i + di).checked_sub(1).filter(|&ii| ii < p) else {
                                continue;
                            };
                            for j in 0..p {
                                if zf[i * p + j] <= 0.0 {
                                    continue;
                                }
                                if let Some(jj) = (j + dj).checked_sub(1).filter(|&jj| jj < p) {
                                    acc += x[ii * p + jj];
                                }
                            }
                        }
                        g.conv_w[(f * self.bands + b) * 9 + di * 3 + dj] = scale * acc;
                    }
                }
            }
        }
        g
    }

    fn apply(&mut self, g: &Gradients, step: f64) {
        let pairs = [
            (&mut self.conv_w, &g.conv_w),
            (&mut self.conv_b, &g.conv_b),
            (&mut self.dense_w, &g.dense_w),
            (&mut self.dense_b, &g.dense_b),
        ];
        for (params, grads) in pairs {
            for (w, d) in params.iter_mut().zip(grads) {
                *w -= step * d;
            }
        }
    }

    fn predict_input(&self, input: &[f64]) -> u8 {
        argmax(&self.forward(input).probs) as u8
    }

    /// Class of one patch of the image
    pub fn predict_patch(&self, pixels: ArrayView2<'_, f64>, cols: usize, patch: &Patch) -> u8 {
        self.predict_input(&self.patch_input(pixels, cols, patch))
    }

    fn check_input(&self, pixels: ArrayView2<'_, f64>, rows: usize, cols: usize) -> Result<()> {
        if pixels.ncols() != self.bands {
            return Err(Error::InvalidParameter {
                name: "bands",
                value: pixels.ncols().to_string(),
                reason: format!("model was trained on {} bands", self.bands),
            });
        }
        if rows < self.patch_size || cols < self.patch_size || pixels.nrows() != rows * cols {
            return Err(Error::InvalidParameter {
                name: "image",
                value: format!("{}x{}", rows, cols),
                reason: format!("must be at least {0}x{0} pixels", self.patch_size),
            });
        }
        Ok(())
    }

    /// Anchor of the inference tile holding a pixel, matching [`PatchIterator::covering`]
    fn tile_anchor(&self, row: usize, col: usize, rows: usize, cols: usize) -> Patch {
        let p = self.patch_size;
        Patch {
            row: ((row / p) * p).min(rows - p),
            col: ((col / p) * p).min(cols - p),
            size: p,
        }
    }

    /// Labels for the row-major pixels in `range` of a `rows` x `cols` image
    pub fn classify_range(
        &self,
        pixels: ArrayView2<'_, f64>,
        rows: usize,
        cols: usize,
        range: Range<usize>,
    ) -> Result<Vec<u8>> {
        self.check_input(pixels, rows, cols)?;
        let end = range.end.min(rows * cols);
        let start = range.start.min(end);

        // Tiles touched by the range, predicted once each
        let mut tiles: Vec<Patch> = Vec::new();
        for i in start..end {
            let tile = self.tile_anchor(i / cols, i % cols, rows, cols);
            if tiles.last() != Some(&tile) && !tiles.contains(&tile) {
                tiles.push(tile);
            }
        }
        let predictions: HashMap<(usize, usize), u8> = tiles
            .par_iter()
            .map(|t| ((t.row, t.col), self.predict_patch(pixels, cols, t)))
            .collect::<Vec<_>>()
            .into_iter()
            .collect();

        Ok((start..end)
            .map(|i| {
                let t = self.tile_anchor(i / cols, i % cols, rows, cols);
                predictions.get(&(t.row, t.col)).copied().unwrap_or(0)
            })
            .collect())
    }
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_majority_and_tie() {
        assert_eq!(patch_majority([2, 2, 5]), Some(PatchLabel::Majority(LandCoverClass::Grassland)));
        let tie = patch_majority([4, 1, 4, 1]).unwrap();
        assert_eq!(tie, PatchLabel::Tie(vec![LandCoverClass::Forest, LandCoverClass::Barren]));
        assert_eq!(tie.resolve(TieBreak::LowestClassId), Some(LandCoverClass::Forest));
        assert_eq!(tie.resolve(TieBreak::Skip), None);
        assert_eq!(patch_majority(std::iter::empty()), None);
    }

    /// Left half water (0), right half forest (1)
    fn split_labels(rows: usize, cols: usize) -> Vec<u8> {
        (0..rows * cols).map(|i| u8::from(i % cols >= cols / 2)).collect()
    }

    #[test]
    fn test_extract_counts_ties() {
        let params = PatchCnnParams {
            patch_size: 4,
            ..Default::default()
        };
        // 8x8 grid, stride 2: anchors 0, 2, 4 per axis; patches at col 2 straddle the boundary evenly
        let labels = split_labels(8, 8);
        let ds = extract_patches(&labels, 8, 8, &params).unwrap();
        assert_eq!(ds.len(), 9);
        assert_eq!(ds.tied, 3);
        assert_eq!(ds.skipped, 0);

        let skip = PatchCnnParams {
            tie_break: TieBreak::Skip,
            ..params
        };
        let ds = extract_patches(&labels, 8, 8, &skip).unwrap();
        assert_eq!(ds.len(), 6);
        assert_eq!(ds.skipped, 3);
    }

    fn two_region_image(rows: usize, cols: usize) -> Array2<f64> {
        // band 0 bright on the left, band 1 bright on the right
        let mut pixels = Array2::zeros((rows * cols, 2));
        for i in 0..rows * cols {
            let right = i % cols >= cols / 2;
            pixels[[i, 0]] = if right { 0.1 } else { 0.9 };
            pixels[[i, 1]] = if right { 0.9 } else { 0.1 };
        }
        pixels
    }

    #[test]
    fn test_learns_separable_patches() {
        let (rows, cols) = (16, 32);
        let pixels = two_region_image(rows, cols);
        let labels = split_labels(rows, cols);
        let params = PatchCnnParams {
            patch_size: 8,
            filters: 4,
            epochs: 60,
            batch_size: 4,
            learning_rate: 0.5,
            tie_break: TieBreak::Skip,
            ..Default::default()
        };

        let ds = extract_patches(&labels, rows, cols, &params).unwrap();
        let (net, report) = PatchCnn::fit(pixels.view(), cols, &ds, &params).unwrap();
        assert!(report.final_loss.is_finite());
        assert!(report.train_accuracy > 0.9, "Expected accuracy > 0.9, got {}", report.train_accuracy);

        let classes = net.classify_range(pixels.view(), rows, cols, 0..rows * cols).unwrap();
        assert_eq!(classes[0], 0);
        assert_eq!(classes[cols - 1], 1);
    }

    #[test]
    fn test_classify_range_matches_full_image() {
        let (rows, cols) = (10, 12);
        let pixels = two_region_image(rows, cols);
        let labels = split_labels(rows, cols);
        let params = PatchCnnParams {
            patch_size: 4,
            filters: 2,
            epochs: 2,
            ..Default::default()
        };
        let ds = extract_patches(&labels, rows, cols, &params).unwrap();
        let (net, _) = PatchCnn::fit(pixels.view(), cols, &ds, &params).unwrap();

        let full = net.classify_range(pixels.view(), rows, cols, 0..rows * cols).unwrap();
        let mut pieces = net.classify_range(pixels.view(), rows, cols, 0..37).unwrap();
        pieces.extend(net.classify_range(pixels.view(), rows, cols, 37..rows * cols).unwrap());
        assert_eq!(full, pieces);
    }

    #[test]
    fn test_image_smaller_than_patch() {
        let pixels = two_region_image(4, 4);
        let labels = split_labels(4, 4);
        let params = PatchCnnParams::default();
        let ds = extract_patches(&labels, 4, 4, &params).unwrap();
        assert!(ds.is_empty());
        assert!(matches!(
            PatchCnn::fit(pixels.view(), 4, &ds, &params),
            Err(Error::TrainingFailure(_))
        ));
    }
}
