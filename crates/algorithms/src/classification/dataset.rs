//! Train/test splitting and evaluation metrics

use super::land_cover::NUM_CLASSES;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use terrawatch_core::{Error, Result};

/// Default share of samples held out for testing
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;
/// Default seed for every randomized step of training
pub const DEFAULT_SEED: u64 = 42;

/// Index sets of a train/test split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle `0..n` with a seeded generator and hold out `ceil(n * test_fraction)` samples.
///
/// The same `(n, test_fraction, seed)` always yields the same split.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> Result<Split> {
    if !(0.0..1.0).contains(&test_fraction) {
        return Err(Error::InvalidParameter {
            name: "test_fraction",
            value: test_fraction.to_string(),
            reason: "must be in [0, 1)".into(),
        });
    }
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    if n < 2 || n_test >= n {
        return Err(Error::TrainingFailure(format!(
            "{} samples are too few for a {:.0}% test split",
            n,
            test_fraction * 100.0
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let train = indices.split_off(n_test);
    Ok(Split {
        train,
        test: indices,
    })
}

/// Accuracy, weighted precision/recall/F1 and the confusion matrix.
///
/// Precision, recall and F1 are averaged over classes present in the truth,
/// weighted by support; a class with no predictions scores 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// `confusion_matrix[truth][predicted]` over all six classes
    pub confusion_matrix: Vec<Vec<usize>>,
    pub train_accuracy: Option<f64>,
    pub test_accuracy: Option<f64>,
}

pub fn accuracy(truth: &[u8], predicted: &[u8]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let hits = truth.iter().zip(predicted).filter(|(a, b)| a == b).count();
    hits as f64 / truth.len() as f64
}

pub fn evaluate(truth: &[u8], predicted: &[u8]) -> Result<ClassificationMetrics> {
    if truth.len() != predicted.len() {
        return Err(Error::Algorithm(format!(
            "label count mismatch: {} truths vs {} predictions",
            truth.len(),
            predicted.len()
        )));
    }

    let mut confusion = vec![vec![0usize; NUM_CLASSES]; NUM_CLASSES];
    for (&t, &p) in truth.iter().zip(predicted) {
        if let Some(row) = confusion.get_mut(t as usize) {
            if let Some(cell) = row.get_mut(p as usize) {
                *cell += 1;
            }
        }
    }

    let total = truth.len() as f64;
    let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
    for class in 0..NUM_CLASSES {
        let support: usize = confusion[class].iter().sum();
        if support == 0 {
            continue;
        }
        let tp = confusion[class][class] as f64;
        let predicted_as: usize = confusion.iter().map(|row| row[class]).sum();

        let p = if predicted_as > 0 { tp / predicted_as as f64 } else { 0.0 };
        let r = tp / support as f64;
        let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };

        let weight = support as f64 / total;
        precision += weight * p;
        recall += weight * r;
        f1 += weight * f;
    }

    Ok(ClassificationMetrics {
        accuracy: accuracy(truth, predicted),
        precision,
        recall,
        f1_score: f1,
        confusion_matrix: confusion,
        train_accuracy: None,
        test_accuracy: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_split_is_deterministic_and_disjoint() {
        let a = train_test_split(100, 0.2, 42).unwrap();
        let b = train_test_split(100, 0.2, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.test.len(), 20);
        assert_eq!(a.train.len(), 80);

        let mut all: Vec<usize> = a.train.iter().chain(a.test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());

        let c = train_test_split(100, 0.2, 7).unwrap();
        assert_ne!(a.test, c.test);
    }

    #[test]
    fn test_split_rejects_degenerate_input() {
        assert!(train_test_split(1, 0.2, 42).is_err());
        assert!(train_test_split(10, 1.0, 42).is_err());
    }

    #[test]
    fn test_perfect_predictions() {
        let labels = [0u8, 1, 2, 2, 5];
        let m = evaluate(&labels, &labels).unwrap();
        assert_relative_eq!(m.accuracy, 1.0);
        assert_relative_eq!(m.precision, 1.0);
        assert_relative_eq!(m.f1_score, 1.0);
        assert_eq!(m.confusion_matrix[2][2], 2);
    }

    #[test]
    fn test_weighted_scores_with_zero_division() {
        // class 0: 2 samples, both predicted 1; class 1: 2 samples, correct
        let truth = [0u8, 0, 1, 1];
        let pred = [1u8, 1, 1, 1];
        let m = evaluate(&truth, &pred).unwrap();

        assert_relative_eq!(m.accuracy, 0.5);
        // class 0 precision 0 (no predictions), class 1 precision 0.5
        assert_relative_eq!(m.precision, 0.25);
        assert_relative_eq!(m.recall, 0.5);
        // class 1 f1 = 2*0.5*1/(1.5)
        assert_relative_eq!(m.f1_score, 0.5 * (2.0 / 3.0), epsilon = 1e-12);
        assert_eq!(m.confusion_matrix[0][1], 2);
    }
}
