use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Integrity error: {0}")]
    IntegrityError(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("{0}")]
    Other(String),
}

impl VectorStoreError {
    pub(crate) fn persistence(
        action: &str,
        path: &std::path::Path,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::PersistenceError(format!("{action} {}: {err}", path.display()))
    }
}
