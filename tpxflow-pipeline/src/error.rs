//! Pipeline error types.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage's input still held data once its workers had drained the
    /// sentinel, or the sentinel could not be delivered.
    #[error("shutdown protocol violated in stage '{stage}': {detail}")]
    ShutdownProtocol { stage: String, detail: String },

    /// `start` was called twice.
    #[error("pipeline already started")]
    AlreadyStarted,

    /// `stop` was called before `start`.
    #[error("pipeline not started")]
    NotStarted,

    /// A pipeline needs at least one stage.
    #[error("pipeline has no stages")]
    NoStages,

    /// A worker thread panicked outside the processing call.
    #[error("worker {worker} of stage '{stage}' panicked")]
    WorkerPanicked { stage: String, worker: usize },

    /// A stage processor failed.
    #[error("stage '{stage}': {message}")]
    Processor { stage: &'static str, message: String },

    /// Configuration could not be read or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error, including thread spawn failures.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Decoder or windower error.
    #[error("tpx error: {0}")]
    Tpx(#[from] tpxflow_tpx::Error),

    /// Centroiding error.
    #[error("centroid error: {0}")]
    Algorithms(#[from] tpxflow_algorithms::Error),
}
