//! Error types for the proteomics-daa library.

use thiserror::Error;

/// Main error type for the library.
///
/// Shape and precondition problems with whole inputs surface here. Problems
/// confined to a single feature (too few observations, a singular observed
/// design) are recorded on that feature instead, see
/// [`FitStatus`](crate::model::FitStatus).
#[derive(Error, Debug)]
pub enum DaaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid value '{value}' at row {row}, column '{column}'")]
    InvalidValue {
        value: String,
        row: usize,
        column: String,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Duplicate identifier '{0}'")]
    DuplicateId(String),

    #[error("Sample ID mismatch: {0}")]
    SampleMismatch(String),

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Feature '{feature}' (row {row}) has an empty grouping key in column '{column}'")]
    MissingGroupingKey {
        feature: String,
        row: usize,
        column: String,
    },

    #[error("Invalid variable type for column '{column}': {reason}")]
    InvalidVariableType { column: String, reason: String },

    #[error("Formula parse error: {0}")]
    FormulaParse(String),

    #[error("Contrast parse error: {0}")]
    ContrastParse(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, DaaError>;
