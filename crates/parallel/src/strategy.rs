//! Parallel processing strategies

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// How per-index work is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Single-threaded processing
    Sequential,
    /// Rayon global pool
    #[default]
    Parallel,
    /// Dedicated pool with the given number of threads
    ParallelWith(usize),
}

/// Strategy for mapping a function over an index range
pub trait ParallelStrategy {
    /// Map `f` over `range`, keeping index order in the output
    fn par_map<T, F>(&self, range: Range<usize>, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send;
}

#[cfg(feature = "parallel")]
impl ParallelStrategy for ProcessingMode {
    fn par_map<T, F>(&self, range: Range<usize>, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        use rayon::prelude::*;

        match self {
            ProcessingMode::Sequential => range.map(f).collect(),
            ProcessingMode::Parallel => range.into_par_iter().map(f).collect(),
            ProcessingMode::ParallelWith(threads) => {
                match rayon::ThreadPoolBuilder::new().num_threads(*threads).build() {
                    Ok(pool) => pool.install(|| range.into_par_iter().map(f).collect()),
                    // pool creation only fails on OS thread exhaustion
                    Err(_) => range.into_par_iter().map(f).collect(),
                }
            }
        }
    }
}

#[cfg(not(feature = "parallel"))]
impl ParallelStrategy for ProcessingMode {
    fn par_map<T, F>(&self, range: Range<usize>, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        range.map(f).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes_agree() {
        let square = |i: usize| i * i;
        let seq = ProcessingMode::Sequential.par_map(0..100, square);
        let par = ProcessingMode::Parallel.par_map(0..100, square);
        let pool = ProcessingMode::ParallelWith(2).par_map(0..100, square);
        assert_eq!(seq, par);
        assert_eq!(seq, pool);
        assert_eq!(seq[99], 9801);
    }
}
