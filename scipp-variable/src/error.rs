use arrow_schema::ArrowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VariableError {
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Expected {expected} values for shape {shape:?}, got {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("Dimension not found: `{0}`")]
    DimensionNotFound(String),

    #[error("Not found: `{0}`")]
    NotFound(String),

    #[error("Bin indices do not match: {0}")]
    BinIndicesMismatch(String),

    #[error("Invalid bins: {0}")]
    InvalidBins(String),

    #[error("Arrow error: `{0}`")]
    ArrowError(#[from] ArrowError),
}

impl VariableError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
