use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] finrag_vector_store::VectorStoreError),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl RetrievalError {
    /// True when persisted index and metadata disagree; the service must not start serving.
    #[must_use]
    pub const fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Self::VectorStoreError(finrag_vector_store::VectorStoreError::IntegrityError(_))
        )
    }

    /// True when the remote backend could not be reached.
    #[must_use]
    pub const fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            Self::VectorStoreError(finrag_vector_store::VectorStoreError::BackendUnavailable(_))
        )
    }
}
