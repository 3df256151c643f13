use thiserror::Error;

/// Errors raised at the boundary of each pipeline stage.
#[derive(Debug, Error)]
pub enum OffsetError {
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("no latent factor model has been fitted yet")]
    UnfittedModel,
    #[error("the candidate set contains no usable loci")]
    EmptyCandidateSet,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record in {fname} at line {line}: {message}")]
    Parse {
        fname: String,
        line: usize,
        message: String,
    },
    #[error("linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
    #[error("decomposition failed: {0}")]
    Decomposition(String),
}

pub type Result<T> = std::result::Result<T, OffsetError>;
