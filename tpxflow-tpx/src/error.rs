//! TPX3-specific error types.

use thiserror::Error;

/// Result type for TPX3 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// TPX3-specific error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Bucket assignment found the trigger buffer out of order.
    #[error("trigger ordering fault: {0}")]
    TriggerOrdering(String),

    /// Configuration could not be read or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] tpxflow_core::Error),
}
