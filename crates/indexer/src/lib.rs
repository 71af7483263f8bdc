//! # gitvec indexer
//!
//! Git-aware incremental indexing of a source tree into a vector store.
//!
//! ## Pipeline
//!
//! ```text
//! Directory
//!     │
//!     ├──> File Scanner (.gitignore aware)
//!     │      └─> Indexable paths
//!     │
//!     ├──> File Identity (git blob id or sha256)
//!     │      └─> Content signature + branch context
//!     │
//!     ├──> File Processor (bounded workers, batch embed)
//!     │      └─> One atomic commit per file
//!     │
//!     └──> Branch-Aware Indexer + Reconciliation
//!            └─> Points hidden/shown per branch
//! ```
//!
//! A file's points are keyed by its content signature, so the same content
//! on two branches is stored once and only its visibility changes when
//! `HEAD` moves.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gitvec_indexer::{IndexerConfig, IndexingEngine, NoProgress};
//! use gitvec_vector_store::{HashingEmbedder, MemoryVectorStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = IndexingEngine::open(
//!         "/path/to/project",
//!         IndexerConfig::default(),
//!         Arc::new(MemoryVectorStore::new()),
//!         Arc::new(HashingEmbedder::new(384)?),
//!     )
//!     .await?;
//!     let report = engine.index(&NoProgress).await?;
//!
//!     let totals = report.totals();
//!     println!("Indexed {} files, {} chunks", totals.files_processed, totals.chunks_created);
//!     Ok(())
//! }
//! ```

mod branch;
mod config;
mod engine;
mod error;
mod git;
mod identity;
mod metadata;
mod persist;
mod processor;
mod progress;
mod reconcile;
mod scanner;
mod session;
mod watch;

pub use branch::{
    is_complete_set, BranchAwareIndexer, BranchIndexOutcome, ChangeKind, ClassifiedChange,
    Retired, BULK_CLASSIFY_THRESHOLD,
};
pub use config::{
    config_path, state_dir, EmbeddingBackend, EmbeddingConfig, IndexerConfig, ProcessingConfig,
    ScanConfig, StoreBackend, StoreConfig, WatchConfig, CONFIG_FILE, STATE_DIR,
};
pub use engine::{
    metadata_path, watch_session_path, CycleOutcome, EngineStatus, IndexReport, IndexingEngine,
};
pub use error::{IndexerError, Result};
pub use git::{detached_branch_name, BranchContext, BranchDiff, GitTopology, UNBORN_COMMIT};
pub use identity::{
    compute_project_id, point_id, sha256_hex, ContentHashSignatureStrategy, FileContext,
    FileIdentityResolver, FileRecord, GitSignatureStrategy, SignatureStrategy, WORKSPACE_BRANCH,
};
pub use metadata::{
    remaining, IndexStatus, MetadataStatus, MetadataStore, ProgressiveIndexMetadata,
    METADATA_SCHEMA_VERSION,
};
pub use processor::{
    CommittedFile, CompletionJournal, FileProcessor, NoJournal, ProcessStats, ProcessorOptions,
    RecordingJournal,
};
pub use progress::{CancellationFlag, NoProgress, ProgressControl, ProgressSink};
pub use reconcile::{ReconcileOutcome, ReconcilePlan, ReconcileReport, ReconciliationEngine};
pub use scanner::{normalize_path, FileScanner};
pub use session::WatchSessionMetadata;
pub use watch::{IndexUpdate, WatchHealth, WatchOptions, WatchSession};
