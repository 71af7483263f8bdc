//! Bounded-parallel read → chunk → embed → commit pipeline.
//!
//! Each file is owned by exactly one task from read to commit, and all of its
//! points go to the store in a single `upsert_points` call, so a file is
//! either fully present or absent. Completions are funnelled back to the
//! collection loop in [`FileProcessor::process`], the only place that touches
//! stats, the completion journal and the progress sink.

use crate::config::ProcessingConfig;
use crate::identity::{FileIdentityResolver, FileRecord};
use crate::persist::unix_now_secs;
use crate::progress::{CancellationFlag, ProgressControl, ProgressSink};
use crate::{IndexerError, Result};
use async_trait::async_trait;
use gitvec_code_chunker::{Chunker, TextChunk};
use gitvec_vector_store::{
    ContentPoint, EmbeddingProvider, PointPayload, VectorStore, VectorStoreError,
};
use log::{debug, error, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessStats {
    /// Files whose chunks were durably committed
    pub files_processed: usize,
    pub chunks_created: usize,
    /// Vanished or unreadable files
    pub skipped_files: usize,
    /// Files whose embedding or commit failed
    pub failed_files: usize,
    /// Stopped before every file was dispatched
    pub cancelled: bool,
}

impl ProcessStats {
    pub fn merge(&mut self, other: &Self) {
        self.files_processed += other.files_processed;
        self.chunks_created += other.chunks_created;
        self.skipped_files += other.skipped_files;
        self.failed_files += other.failed_files;
        self.cancelled |= other.cancelled;
    }
}

/// A file whose point set is complete in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedFile {
    pub path: String,
    pub content_signature: String,
    pub chunk_count: usize,
    /// Existing points were made visible instead of embedding new ones
    pub reused: bool,
}

/// Durable record of per-file completion, fed by a single writer.
#[async_trait]
pub trait CompletionJournal: Send {
    async fn file_committed(&mut self, file: &CommittedFile) -> Result<()>;

    async fn file_failed(&mut self, path: &str, error: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoJournal;

#[async_trait]
impl CompletionJournal for NoJournal {
    async fn file_committed(&mut self, _file: &CommittedFile) -> Result<()> {
        Ok(())
    }

    async fn file_failed(&mut self, _path: &str, _error: &str) -> Result<()> {
        Ok(())
    }
}

/// Journal wrapper that also remembers what went through it.
pub struct RecordingJournal<'a> {
    inner: &'a mut dyn CompletionJournal,
    pub committed: Vec<CommittedFile>,
    pub failed: BTreeSet<String>,
}

impl<'a> RecordingJournal<'a> {
    pub fn new(inner: &'a mut dyn CompletionJournal) -> Self {
        Self {
            inner,
            committed: Vec::new(),
            failed: BTreeSet::new(),
        }
    }
}

#[async_trait]
impl CompletionJournal for RecordingJournal<'_> {
    async fn file_committed(&mut self, file: &CommittedFile) -> Result<()> {
        self.inner.file_committed(file).await?;
        self.committed.push(file.clone());
        Ok(())
    }

    async fn file_failed(&mut self, path: &str, error: &str) -> Result<()> {
        self.failed.insert(path.to_string());
        self.inner.file_failed(path, error).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorOptions {
    pub worker_count: usize,
    /// Texts per embedding request
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self::from(&ProcessingConfig::default())
    }
}

impl From<&ProcessingConfig> for ProcessorOptions {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            worker_count: config.worker_count,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
        }
    }
}

pub struct FileProcessor {
    worker: Arc<Worker>,
    options: ProcessorOptions,
    cancel: CancellationFlag,
}

/// Shared, read-only state of the per-file tasks
struct Worker {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    resolver: Arc<FileIdentityResolver>,
    chunker: Chunker,
    collection: String,
    batch_size: usize,
    max_retries: u32,
    retry_base_delay: Duration,
}

enum FileOutcome {
    Committed(CommittedFile),
    Skipped { path: String, reason: String },
    Failed { path: String, error: String },
    /// Failure that affects every file, not just this one
    Halted { path: String, error: IndexerError },
}

impl FileProcessor {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        resolver: Arc<FileIdentityResolver>,
        chunker: Chunker,
        collection: impl Into<String>,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                store,
                embedder,
                resolver,
                chunker,
                collection: collection.into(),
                batch_size: options.batch_size.max(1),
                max_retries: options.max_retries,
                retry_base_delay: options.retry_base_delay,
            }),
            options,
            cancel: CancellationFlag::new(),
        }
    }

    #[must_use]
    pub const fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    /// Safe from any thread, any number of times.
    pub fn request_cancellation(&self) {
        if self.cancel.cancel() {
            info!("Cancellation requested; finishing in-flight files");
        }
    }

    #[must_use]
    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn process(
        &self,
        files: &[String],
        progress: &dyn ProgressSink,
        journal: &mut dyn CompletionJournal,
    ) -> Result<ProcessStats> {
        self.process_with(
            files,
            self.options.worker_count,
            self.options.batch_size,
            progress,
            journal,
        )
        .await
    }

    /// Processes `files` with at most `worker_count` files in flight.
    ///
    /// Systemic failures stop dispatching, let in-flight files finish and
    /// return [`IndexerError::RunHalted`] with the stats so far.
    pub async fn process_with(
        &self,
        files: &[String],
        worker_count: usize,
        batch_size: usize,
        progress: &dyn ProgressSink,
        journal: &mut dyn CompletionJournal,
    ) -> Result<ProcessStats> {
        let total = files.len();
        let worker_count = worker_count.max(1);
        let worker = if batch_size.max(1) == self.worker.batch_size {
            Arc::clone(&self.worker)
        } else {
            Arc::new(self.worker.with_batch_size(batch_size.max(1)))
        };

        if total > 0 {
            info!("Processing {total} files with {worker_count} workers");
        }

        let mut stats = ProcessStats::default();
        let mut queue = files.iter();
        let mut in_flight = JoinSet::new();
        let mut completed = 0usize;
        let mut halted: Option<String> = None;

        loop {
            while in_flight.len() < worker_count && halted.is_none() && !self.cancel.is_cancelled()
            {
                let Some(path) = queue.next() else {
                    break;
                };
                let worker = Arc::clone(&worker);
                let path = path.clone();
                in_flight.spawn(async move { worker.process_file(path).await });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            completed += 1;

            let outcome = joined.unwrap_or_else(|err| FileOutcome::Failed {
                path: String::from("<unknown>"),
                error: format!("worker task failed: {err}"),
            });

            let (path, info) = match outcome {
                FileOutcome::Committed(file) => {
                    stats.files_processed += 1;
                    stats.chunks_created += file.chunk_count;
                    if let Err(err) = journal.file_committed(&file).await {
                        error!("Failed to record completion of {}: {err}", file.path);
                        halted.get_or_insert_with(|| err.to_string());
                    }
                    let info = format!("{} chunks", file.chunk_count);
                    (file.path, info)
                }
                FileOutcome::Skipped { path, reason } => {
                    stats.skipped_files += 1;
                    warn!("Skipping {path}: {reason}");
                    (path, format!("skipped: {reason}"))
                }
                FileOutcome::Failed { path, error } => {
                    stats.failed_files += 1;
                    warn!("Failed to index {path}: {error}");
                    if let Err(err) = journal.file_failed(&path, &error).await {
                        halted.get_or_insert_with(|| err.to_string());
                    }
                    (path, format!("failed: {error}"))
                }
                FileOutcome::Halted { path, error } => {
                    stats.failed_files += 1;
                    error!("Halting run at {path}: {error}");
                    let reason = error.to_string();
                    if let Err(err) = journal.file_failed(&path, &reason).await {
                        warn!("Failed to record failure of {path}: {err}");
                    }
                    halted.get_or_insert(reason.clone());
                    (path, format!("halted: {reason}"))
                }
            };

            if progress.report(completed, total, &path, &info) == ProgressControl::Cancel {
                self.request_cancellation();
            }
        }

        stats.cancelled = self.cancel.is_cancelled() && completed < total;
        if stats.cancelled {
            info!(
                "Run cancelled after {completed}/{total} files ({} committed)",
                stats.files_processed
            );
        }

        match halted {
            Some(reason) => Err(IndexerError::RunHalted { stats, reason }),
            None => {
                debug!("Processing finished: {stats:?}");
                Ok(stats)
            }
        }
    }
}

impl Worker {
    fn with_batch_size(&self, batch_size: usize) -> Self {
        Self {
            store: Arc::clone(&self.store),
            embedder: Arc::clone(&self.embedder),
            resolver: Arc::clone(&self.resolver),
            chunker: self.chunker.clone(),
            collection: self.collection.clone(),
            batch_size,
            max_retries: self.max_retries,
            retry_base_delay: self.retry_base_delay,
        }
    }

    async fn process_file(&self, path: String) -> FileOutcome {
        let (record, bytes) = match self.resolver.resolve_with_content(&path).await {
            Ok(resolved) => resolved,
            Err(IndexerError::FileUnreadable { source, .. }) => {
                return FileOutcome::Skipped {
                    path,
                    reason: source.to_string(),
                };
            }
            Err(err) => {
                return FileOutcome::Failed {
                    path,
                    error: err.to_string(),
                };
            }
        };

        let text = String::from_utf8_lossy(&bytes);
        let chunks = match self.chunker.chunk_str(&text, Some(&path)) {
            Ok(chunks) if !chunks.is_empty() => chunks,
            Ok(_) => {
                return FileOutcome::Skipped {
                    path,
                    reason: "no content".to_string(),
                };
            }
            Err(err) => {
                return FileOutcome::Failed {
                    path,
                    error: err.to_string(),
                };
            }
        };

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = match self.embed_all(&path, &texts).await {
            Ok(vectors) => vectors,
            Err(err) => return Self::classify_failure(path, err),
        };

        let chunk_count = chunks.len();
        let points = self.build_points(&record, chunks, vectors);
        match self.store.upsert_points(&self.collection, points).await {
            Ok(()) => FileOutcome::Committed(CommittedFile {
                path,
                content_signature: record.content_signature,
                chunk_count,
                reused: false,
            }),
            Err(err) => Self::classify_failure(path, err),
        }
    }

    fn classify_failure(path: String, err: VectorStoreError) -> FileOutcome {
        if err.is_systemic() {
            FileOutcome::Halted {
                path,
                error: err.into(),
            }
        } else {
            FileOutcome::Failed {
                path,
                error: err.to_string(),
            }
        }
    }

    async fn embed_all(
        &self,
        path: &str,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, VectorStoreError> {
        let group_size = if self.embedder.supports_batch() {
            self.batch_size
        } else {
            1
        };
        let mut vectors = Vec::with_capacity(texts.len());
        for group in texts.chunks(group_size) {
            vectors.extend(self.embed_group(path, group).await?);
        }
        Ok(vectors)
    }

    /// One embedding request with bounded exponential backoff.
    async fn embed_group(
        &self,
        path: &str,
        group: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, VectorStoreError> {
        let mut attempt = 0u32;
        loop {
            let result = match group {
                [single] => self.embedder.embed(single).await.map(|v| vec![v]),
                _ => self.embedder.embed_batch(group).await,
            };
            let result = result.and_then(|vectors| {
                if vectors.len() == group.len() {
                    Ok(vectors)
                } else {
                    Err(VectorStoreError::EmbeddingError(format!(
                        "expected {} embeddings, got {}",
                        group.len(),
                        vectors.len()
                    )))
                }
            });

            match result {
                Ok(vectors) => return Ok(vectors),
                Err(err) if attempt < self.max_retries => {
                    let delay = self
                        .retry_base_delay
                        .saturating_mul(1u32 << attempt.min(10));
                    attempt += 1;
                    warn!(
                        "Embedding {path} failed (attempt {attempt}/{}): {err}; retrying in {delay:?}",
                        self.max_retries + 1
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn build_points(
        &self,
        record: &FileRecord,
        chunks: Vec<TextChunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Vec<ContentPoint> {
        let indexed_at = unix_now_secs();
        let git = record.git_context();
        chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| ContentPoint {
                id: FileIdentityResolver::create_point_id(record, chunk.chunk_index),
                vector,
                payload: PointPayload {
                    project_id: record.project_id.clone(),
                    path: record.path.clone(),
                    content_signature: record.content_signature.clone(),
                    chunk_index: chunk.chunk_index,
                    total_chunks: chunk.total_chunks,
                    language: chunk.language.as_str().to_string(),
                    indexed_at,
                    hidden_branches: BTreeSet::new(),
                    text: chunk.text,
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    git_branch: git.map(|ctx| ctx.branch.clone()),
                    git_commit: git.map(|ctx| ctx.commit.clone()),
                },
            })
            .collect()
    }
}
