//! Error types for tpxflow-algorithms.

use thiserror::Error;

/// Result type alias for centroiding operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Centroiding errors.
#[derive(Error, Debug)]
pub enum Error {
    /// The clustering capability returned the wrong number of labels.
    #[error("clustering returned {labels} labels for {points} points")]
    LabelMismatch { points: usize, labels: usize },

    /// A parameter is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The chunk thread pool could not be started.
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
