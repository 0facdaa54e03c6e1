use thiserror::Error;

/// Error type for invalid operations.
#[derive(Error, Debug)]
pub enum ColnetError {
    #[error("{0}")]
    Error(String),
    #[error("Degenerate constraint: the correction basis integrates to {basis_integral}")]
    DegenerateConstraint { basis_integral: f64 },
    #[error("Invalid value in {context} (field {field})")]
    NumericValidity { field: String, context: String },
    #[error("Shape mismatch for {what}: expected {expected}, got {found}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        found: usize,
    },
    #[error("Field {0} is missing")]
    MissingField(String),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Serialization failed: {0}")]
    Serialization(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ColnetError {
    pub fn shape(what: impl Into<String>, expected: usize, found: usize) -> Self {
        ColnetError::ShapeMismatch {
            what: what.into(),
            expected,
            found,
        }
    }
}

/// Convenience type for `Result<T, ColnetError>`.
pub type ColnetResult<T> = Result<T, ColnetError>;
