use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector store unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl VectorStoreError {
    /// Errors that mean the backend itself is gone, so retrying other files is pointless.
    #[must_use]
    pub const fn is_systemic(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::EmbeddingUnavailable(_) | Self::CollectionNotFound(_)
        )
    }
}
