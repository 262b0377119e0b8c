use scipp_variable::VariableError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordTransformError {
    #[error("Coordinate not found: `{0}`, neither in the input nor produced by the graph")]
    CoordNotFound(String),

    #[error("Coordinate `{0}` was released after its last use and cannot be consumed again")]
    CoordReleased(String),

    #[error("Dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("Output `{0}` is produced by more than one node of the graph")]
    DuplicateOutput(String),

    #[error("Function `{0}` with variable arguments not allowed in a coordinate graph")]
    VariadicFunction(String),

    #[error("Function `{function}` takes {expected} arguments but {actual} input keys were given")]
    InputKeysMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("Function `{function}` returned a single output, expected outputs {expected:?}")]
    NotAMapping {
        function: String,
        expected: Vec<String>,
    },

    #[error("Function `{function}` did not return the outputs {missing:?}")]
    MissingOutputs {
        function: String,
        missing: Vec<String>,
    },

    #[error("Invalid options: `{0}`")]
    InvalidOptions(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Variable(#[from] VariableError),
}
