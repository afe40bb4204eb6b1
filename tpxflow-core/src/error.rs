//! Error types for tpxflow-core.

use thiserror::Error;

/// Result type alias for tpxflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Columns of a structure-of-arrays batch disagree in length.
    #[error("column `{column}` has {actual} entries, expected {expected}")]
    ColumnMismatch {
        column: &'static str,
        expected: usize,
        actual: usize,
    },
}
