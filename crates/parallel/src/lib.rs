//! # Terrawatch Parallel
//!
//! Work partitioning for raster workloads.
//!
//! This crate provides:
//! - `ProcessingMode`: sequential or Rayon-backed index mapping
//! - `ChunkPlan`: balanced contiguous chunks with progress percentages
//! - `PatchIterator`: square patches over a grid, strided or covering

pub mod chunks;
pub mod patches;
pub mod strategy;

pub use chunks::{Chunk, ChunkPlan};
pub use patches::{Patch, PatchIterator};
pub use strategy::{ParallelStrategy, ProcessingMode};
