use crate::processor::ProcessStats;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Chunker error: {0}")]
    ChunkerError(#[from] gitvec_code_chunker::ChunkerError),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] gitvec_vector_store::VectorStoreError),

    #[error("File unreadable: {path}: {source}")]
    FileUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Indexing halted after {} committed files: {reason}", stats.files_processed)]
    RunHalted { stats: ProcessStats, reason: String },

    #[error("Watcher error: {0}")]
    WatchError(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Backend-level failures that stop a run instead of skipping one file.
    #[must_use]
    pub const fn is_systemic(&self) -> bool {
        match self {
            Self::VectorStoreError(e) => e.is_systemic(),
            Self::RunHalted { .. } => true,
            _ => false,
        }
    }
}
