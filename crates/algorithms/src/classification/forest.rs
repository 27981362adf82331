//! Random forest classifier
//!
//! CART trees split on Gini impurity over a random subset of features, each
//! grown on a bootstrap sample. Trees are seeded from the forest seed and
//! their index, so training is reproducible regardless of thread scheduling.

use super::land_cover::NUM_CLASSES;
use crate::maybe_rayon::*;
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use terrawatch_core::{Error, Result};
use terrawatch_parallel::{ParallelStrategy, ProcessingMode};

/// Parameters for random forest training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    /// Nodes with fewer samples become leaves
    pub min_samples_split: usize,
    /// Features tried per split; `None` uses the square root of the feature count
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    /// Cap on samples drawn per tree; `None` draws as many as there are samples
    pub max_samples: Option<usize>,
    pub seed: u64,
    /// Scheduling of per-tree training
    pub mode: ProcessingMode,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 20,
            min_samples_split: 2,
            max_features: None,
            bootstrap: true,
            max_samples: None,
            seed: super::DEFAULT_SEED,
            mode: ProcessingMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        class: u8,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: u32,
        right: u32,
    },
}

/// One fitted CART tree; samples with `x[feature] <= threshold` go left
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    pub fn predict(&self, row: ArrayView1<'_, f64>) -> u8 {
        let mut index = 0usize;
        loop {
            match self.nodes.get(index) {
                Some(Node::Leaf { class }) => return *class,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    index = if row[*feature] <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
                None => return 0,
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match nodes.get(index) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left as usize).max(walk(nodes, *right as usize))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

type Counts = [usize; NUM_CLASSES];

fn majority(counts: &Counts) -> u8 {
    let mut best = 0;
    for (class, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = class;
        }
    }
    best as u8
}

struct SplitChoice {
    feature: usize,
    threshold: f64,
    score: f64,
}

struct TreeBuilder<'a> {
    x: ArrayView2<'a, f64>,
    y: &'a [u8],
    params: &'a RandomForestParams,
    mtry: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, samples: &mut [usize], depth: usize) -> u32 {
        let mut counts: Counts = [0; NUM_CLASSES];
        for &i in samples.iter() {
            counts[self.y[i] as usize] += 1;
        }

        let id = self.nodes.len() as u32;
        self.nodes.push(Node::Leaf {
            class: majority(&counts),
        });

        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        if pure || depth >= self.params.max_depth || samples.len() < self.params.min_samples_split {
            return id;
        }
        let Some(split) = self.best_split(samples, &counts) else {
            return id;
        };

        let mut mid = 0;
        for i in 0..samples.len() {
            if self.x[[samples[i], split.feature]] <= split.threshold {
                samples.swap(i, mid);
                mid += 1;
            }
        }
        if mid == 0 || mid == samples.len() {
            return id;
        }

        let (left_samples, right_samples) = samples.split_at_mut(mid);
        let left = self.grow(left_samples, depth + 1);
        let right = self.grow(right_samples, depth + 1);
        self.nodes[id as usize] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    /// Split maximizing Σ l²/n_l + Σ r²/n_r, which minimizes weighted Gini
    fn best_split(&mut self, samples: &[usize], counts: &Counts) -> Option<SplitChoice> {
        let n = samples.len();
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        let (candidates, _) = features.partial_shuffle(&mut self.rng, self.mtry);

        let total_sq: f64 = counts.iter().map(|&c| (c * c) as f64).sum();
        let mut pairs: Vec<(f64, u8)> = Vec::with_capacity(n);
        let mut best: Option<SplitChoice> = None;

        for &feature in candidates.iter() {
            pairs.clear();
            pairs.extend(samples.iter().map(|&i| (self.x[[i, feature]], self.y[i])));
            pairs.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

            let mut left: Counts = [0; NUM_CLASSES];
            let mut right = *counts;
            let (mut left_sq, mut right_sq) = (0.0, total_sq);

            for k in 0..n - 1 {
                let (value, class) = pairs[k];
                let c = class as usize;
                left_sq += (2 * left[c] + 1) as f64;
                left[c] += 1;
                right_sq -= (2 * right[c] - 1) as f64;
                right[c] -= 1;

                let next = pairs[k + 1].0;
                // equal values cannot be separated; NaN sorts last and never splits
                if !(next > value) {
                    continue;
                }
                let n_left = (k + 1) as f64;
                let score = left_sq / n_left + right_sq / (n as f64 - n_left);
                if best.as_ref().map_or(true, |b| score > b.score) {
                    let mut threshold = value + (next - value) / 2.0;
                    if threshold >= next {
                        threshold = value;
                    }
                    best = Some(SplitChoice {
                        feature,
                        threshold,
                        score,
                    });
                }
            }
        }
        best
    }
}

/// An ensemble of CART trees voting by majority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    params: RandomForestParams,
}

impl RandomForest {
    /// Fit on a sample-by-feature matrix and class ids below the class count
    pub fn fit<'a>(x: ArrayView2<'a, f64>, y: &'a [u8], params: &'a RandomForestParams) -> Result<Self> {
        let (n, n_features) = x.dim();
        if n == 0 || n_features == 0 {
            return Err(Error::TrainingFailure("empty training set".into()));
        }
        if n != y.len() {
            return Err(Error::TrainingFailure(format!(
                "{} samples but {} labels",
                n,
                y.len()
            )));
        }
        if let Some(&bad) = y.iter().find(|&&c| c as usize >= NUM_CLASSES) {
            return Err(Error::TrainingFailure(format!("label {} out of range", bad)));
        }
        if params.n_trees == 0 {
            return Err(Error::InvalidParameter {
                name: "n_trees",
                value: "0".into(),
                reason: "at least one tree required".into(),
            });
        }

        let mtry = params
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().round() as usize)
            .clamp(1, n_features);
        let draws = params.max_samples.unwrap_or(n).clamp(1, n);

        let trees = params.mode.par_map(0..params.n_trees, |t| {
            let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
            let mut samples: Vec<usize> = if params.bootstrap {
                (0..draws).map(|_| rng.gen_range(0..n)).collect()
            } else {
                let mut all: Vec<usize> = (0..n).collect();
                all.shuffle(&mut rng);
                all.truncate(draws);
                all
            };
            let mut builder = TreeBuilder {
                x,
                y,
                params,
                mtry,
                rng,
                nodes: Vec::new(),
            };
            builder.grow(&mut samples, 0);
            DecisionTree {
                nodes: builder.nodes,
            }
        });

        Ok(Self {
            trees,
            n_features,
            params: params.clone(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn params(&self) -> &RandomForestParams {
        &self.params
    }

    /// Majority vote over trees; ties go to the lowest class id
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> u8 {
        let mut votes: Counts = [0; NUM_CLASSES];
        for tree in &self.trees {
            if let Some(v) = votes.get_mut(tree.predict(row) as usize) {
                *v += 1;
            }
        }
        majority(&votes)
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Vec<u8>> {
        if x.ncols() != self.n_features {
            return Err(Error::InvalidParameter {
                name: "features",
                value: x.ncols().to_string(),
                reason: format!("model was trained on {} features", self.n_features),
            });
        }
        Ok((0..x.nrows())
            .into_par_iter()
            .map(|i| self.predict_row(x.row(i)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Two bands; class follows which quadrant the pixel sits in
    fn quadrants(n: usize) -> (Array2<f64>, Vec<u8>) {
        let mut x = Array2::zeros((n, 2));
        let mut y = Vec::with_capacity(n);
        let mut rng = StdRng::seed_from_u64(3);
        for i in 0..n {
            let a: f64 = rng.gen();
            let b: f64 = rng.gen();
            x[[i, 0]] = a;
            x[[i, 1]] = b;
            y.push(match (a > 0.5, b > 0.5) {
                (false, false) => 0,
                (true, false) => 1,
                (false, true) => 3,
                (true, true) => 5,
            });
        }
        (x, y)
    }

    fn small_params() -> RandomForestParams {
        RandomForestParams {
            n_trees: 15,
            max_depth: 8,
            max_features: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_learns_axis_aligned_classes() {
        let (x, y) = quadrants(600);
        let forest = RandomForest::fit(x.view(), &y, &small_params()).unwrap();

        let pred = forest.predict(x.view()).unwrap();
        let acc = super::super::accuracy(&y, &pred);
        assert!(acc > 0.97, "Expected training accuracy > 0.97, got {}", acc);

        let probe = ndarray::array![0.9, 0.1];
        assert_eq!(forest.predict_row(probe.view()), 1);
    }

    #[test]
    fn test_training_is_deterministic() {
        let (x, y) = quadrants(200);
        let a = RandomForest::fit(x.view(), &y, &small_params()).unwrap();
        let b = RandomForest::fit(x.view(), &y, &small_params()).unwrap();
        assert_eq!(a, b);

        let sequential = RandomForestParams {
            mode: ProcessingMode::Sequential,
            ..small_params()
        };
        let c = RandomForest::fit(x.view(), &y, &sequential).unwrap();
        assert_eq!(a.trees(), c.trees());
    }

    #[test]
    fn test_depth_limit() {
        let (x, y) = quadrants(300);
        let params = RandomForestParams {
            n_trees: 3,
            max_depth: 1,
            ..Default::default()
        };
        let forest = RandomForest::fit(x.view(), &y, &params).unwrap();
        assert!(forest.trees().iter().all(|t| t.depth() <= 1));
    }

    #[test]
    fn test_single_class_is_a_leaf() {
        let x = Array2::from_elem((10, 3), 0.5);
        let y = vec![4u8; 10];
        let forest = RandomForest::fit(x.view(), &y, &small_params()).unwrap();
        assert!(forest.trees().iter().all(|t| t.node_count() == 1));
        assert_eq!(forest.predict_row(x.row(0)), 4);
    }

    #[test]
    fn test_rejects_bad_input() {
        let x = Array2::zeros((4, 2));
        assert!(RandomForest::fit(x.view(), &[0, 1, 2], &small_params()).is_err());
        assert!(RandomForest::fit(x.view(), &[0, 1, 2, 9], &small_params()).is_err());

        let (x, y) = quadrants(50);
        let forest = RandomForest::fit(x.view(), &y, &small_params()).unwrap();
        let wrong = Array2::zeros((2, 3));
        assert!(forest.predict(wrong.view()).is_err());
    }

    #[test]
    fn test_serde_roundtrip_preserves_predictions() {
        let (x, y) = quadrants(100);
        let forest = RandomForest::fit(x.view(), &y, &small_params()).unwrap();
        let json = serde_json::to_string(&forest).unwrap();
        let back: RandomForest = serde_json::from_str(&json).unwrap();
        assert_eq!(forest.predict(x.view()).unwrap(), back.predict(x.view()).unwrap());
    }
}
