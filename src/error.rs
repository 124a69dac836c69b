//! Error types for decompose

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for table loading, transforms, decomposition and rendering
#[derive(Error, Debug)]
pub enum DecomposeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed input in {}: {reason}", path.display())]
    MalformedInput { path: PathBuf, reason: String },

    #[error("Duplicate feature id '{id}' in {}", path.display())]
    DuplicateFeature { path: PathBuf, id: String },

    #[error("RPKM needs a length for every feature; missing for {} feature(s) (first: {:?})", ids.len(), ids.iter().take(5).collect::<Vec<_>>())]
    MissingLength { ids: Vec<String> },

    #[error("Invalid length {value} for feature '{id}'")]
    InvalidLength { id: String, value: f64 },

    #[error("Sample '{sample}' has zero total counts, RPKM is undefined")]
    ZeroLibrarySize { sample: String },

    #[error("Cannot apply {operation}: {reason}")]
    TransformOrder {
        operation: &'static str,
        reason: String,
    },

    #[error("Numerical domain error in {operation}: {reason}")]
    NumericalDomain {
        operation: &'static str,
        reason: String,
    },

    #[error("Empty table: {operation} needs at least one feature and one sample")]
    EmptyTable { operation: &'static str },

    #[error("Unknown algorithm '{0}' (expected PCA, TSNE or ICA)")]
    UnknownAlgorithm(String),

    #[error("{algorithm} failed: {reason}")]
    Decomposition {
        algorithm: &'static str,
        reason: String,
    },

    #[error("Rendering failed: {0}")]
    Render(String),
}

impl DecomposeError {
    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        DecomposeError::MalformedInput {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for decompose operations
pub type Result<T> = std::result::Result<T, DecomposeError>;
