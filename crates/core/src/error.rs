//! Error types for terrawatch

use thiserror::Error;

/// Main error type for terrawatch operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Raster transform mismatch: rasters do not share the same grid")]
    TransformMismatch,

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Missing band: {0}")]
    MissingBand(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// Malformed area of interest, date range or request
    #[error("Validation error: {0}")]
    Validation(String),

    /// No imagery matched the query, or the provider could not be reached
    #[error("Imagery provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Request exceeds pixel ceiling: {side_pixels} pixels per side (limit {ceiling})")]
    SizeLimitExceeded { side_pixels: u64, ceiling: u64 },

    #[error("Model not trained: {0}. Train first.")]
    ModelNotTrained(String),

    #[error("Training failed: {0}")]
    TrainingFailure(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Session limit reached: {0} active sessions")]
    SessionLimit(usize),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for terrawatch operations
pub type Result<T> = std::result::Result<T, Error>;
