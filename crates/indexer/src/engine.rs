//! Entry point tying the components together.
//!
//! All runs go through the metadata lock, so at most one run per engine is
//! active and the progressive metadata has a single writer.

use crate::branch::{BranchAwareIndexer, BranchIndexOutcome};
use crate::config::{state_dir, IndexerConfig};
use crate::git::{BranchContext, GitTopology};
use crate::identity::{compute_project_id, FileIdentityResolver};
use crate::metadata::{MetadataStatus, MetadataStore};
use crate::processor::{FileProcessor, ProcessStats, ProcessorOptions};
use crate::progress::{CancellationFlag, ProgressSink};
use crate::reconcile::{ReconcileOutcome, ReconciliationEngine};
use crate::scanner::FileScanner;
use crate::{IndexerError, Result};
use gitvec_code_chunker::Chunker;
use gitvec_vector_store::{resolve_collection_name, EmbeddingProvider, PointFilter, VectorStore};
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What one call to [`IndexingEngine::index`] (or `force_full`) did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IndexReport {
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed: Option<BranchIndexOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_switch: Option<BranchIndexOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full: Option<ProcessStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileOutcome>,
}

impl IndexReport {
    /// Processing stats summed over every phase
    #[must_use]
    pub fn totals(&self) -> ProcessStats {
        let mut total = ProcessStats::default();
        for phase in [&self.resumed, &self.branch_switch].into_iter().flatten() {
            total.merge(&phase.stats);
        }
        if let Some(full) = &self.full {
            total.merge(full);
        }
        if let Some(reconcile) = &self.reconcile {
            total.merge(reconcile.stats());
        }
        total
    }

    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.totals().cancelled
    }
}

/// One watch-mode cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CycleOutcome {
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed: Option<BranchIndexOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_switch: Option<BranchIndexOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileOutcome>,
    pub changes: BranchIndexOutcome,
}

impl CycleOutcome {
    #[must_use]
    pub fn totals(&self) -> ProcessStats {
        let mut total = self.changes.stats.clone();
        for phase in [&self.resumed, &self.branch_switch].into_iter().flatten() {
            total.merge(&phase.stats);
        }
        if let Some(reconcile) = &self.reconcile {
            total.merge(reconcile.stats());
        }
        total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EngineStatus {
    pub root: String,
    pub project_id: String,
    pub collection: String,
    pub store_backend: String,
    pub signature_strategy: String,
    pub git_available: bool,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub indexed_files: usize,
    pub points: usize,
    pub visible_points: usize,
    pub metadata: MetadataStatus,
}

pub struct IndexingEngine {
    root: PathBuf,
    config: IndexerConfig,
    project_id: String,
    collection: String,
    store: Arc<dyn VectorStore>,
    git: Arc<GitTopology>,
    resolver: Arc<FileIdentityResolver>,
    processor: Arc<FileProcessor>,
    branch_indexer: Arc<BranchAwareIndexer>,
    reconciler: ReconciliationEngine,
    scanner: FileScanner,
    metadata: Mutex<MetadataStore>,
}

#[must_use]
pub fn metadata_path(root: &Path, collection: &str) -> PathBuf {
    state_dir(root)
        .join("metadata")
        .join(format!("{collection}.json"))
}

#[must_use]
pub fn watch_session_path(root: &Path) -> PathBuf {
    state_dir(root).join("watch_session.json")
}

impl IndexingEngine {
    pub async fn open(
        root: impl AsRef<Path>,
        config: IndexerConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(IndexerError::InvalidPath(format!(
                "Path does not exist or is not a directory: {}",
                root.display()
            )));
        }
        config.validate()?;

        let project_id = compute_project_id(&root)?;
        let git = Arc::new(GitTopology::probe(&root).await);
        let resolver = Arc::new(FileIdentityResolver::for_topology(&project_id, &git));
        resolver.set_branch_context(git.branch_context().await);

        let collection = resolve_collection_name(
            &config.store.collection_prefix,
            &project_id,
            embedder.provider_name(),
            embedder.current_model(),
        );
        store
            .ensure_collection(&collection, embedder.dimensions())
            .await?;

        let processor = Arc::new(FileProcessor::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&resolver),
            Chunker::new(config.chunking.clone()),
            &collection,
            ProcessorOptions::from(&config.processing),
        ));
        let branch_indexer = Arc::new(BranchAwareIndexer::new(
            Arc::clone(&store),
            &collection,
            Arc::clone(&resolver),
            Arc::clone(&processor),
        ));
        let scanner = FileScanner::new(&root, &config.scan)?;
        let reconciler = ReconciliationEngine::new(
            scanner.clone(),
            Arc::clone(&store),
            &collection,
            Arc::clone(&resolver),
            Arc::clone(&branch_indexer),
            config.processing.outdated_tolerance(),
        );
        let metadata = MetadataStore::load_or_init(
            metadata_path(&root, &collection),
            &collection,
            embedder.provider_name(),
            embedder.current_model(),
            config.processing.metadata_flush_every,
        )
        .await?;

        info!(
            "Opened {} (collection {collection}, {} signatures, {} store)",
            root.display(),
            resolver.strategy_name(),
            store.backend_name()
        );

        Ok(Self {
            root,
            config,
            project_id,
            collection,
            store,
            git,
            resolver,
            processor,
            branch_indexer,
            reconciler,
            scanner,
            metadata: Mutex::new(metadata),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn config(&self) -> &IndexerConfig {
        &self.config
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub const fn git(&self) -> &Arc<GitTopology> {
        &self.git
    }

    #[must_use]
    pub const fn scanner(&self) -> &FileScanner {
        &self.scanner
    }

    #[must_use]
    pub const fn branch_indexer(&self) -> &Arc<BranchAwareIndexer> {
        &self.branch_indexer
    }

    #[must_use]
    pub fn is_git_aware(&self) -> bool {
        self.resolver.is_git_aware()
    }

    /// Stops the current run after its in-flight files. Safe from any thread.
    pub fn request_cancellation(&self) {
        self.processor.request_cancellation();
    }

    #[must_use]
    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.processor.cancellation_flag()
    }

    /// Whether the last run was interrupted with files left to index.
    pub async fn can_resume(&self) -> bool {
        self.metadata.lock().await.record().can_resume()
    }

    /// Branch visibility is evaluated against, refreshed from git.
    pub async fn current_branch(&self) -> String {
        self.refresh_branch().await.0
    }

    async fn refresh_branch(&self) -> (String, Option<BranchContext>) {
        let context = if self.resolver.is_git_aware() {
            self.git.branch_context().await
        } else {
            None
        };
        self.resolver.set_branch_context(context.clone());
        (self.resolver.current_branch(), context)
    }

    /// Scope of one run. The cancellation flag is re-armed when the run
    /// ends, so a request made before the run starts still stops it.
    fn begin_run(&self) -> RunScope {
        RunScope(self.processor.cancellation_flag())
    }

    /// Resume, then follow `HEAD`, then reconcile.
    pub async fn index(&self, progress: &dyn ProgressSink) -> Result<IndexReport> {
        let mut meta = self.metadata.lock().await;
        let _run = self.begin_run();
        let (branch, context) = self.refresh_branch().await;
        let (git_branch, git_commit) = split_context(context.as_ref());
        let last_commit = meta.record().git_commit.clone();
        let mut report = IndexReport {
            branch: branch.clone(),
            commit: git_commit.clone(),
            ..IndexReport::default()
        };

        report.resumed = self
            .resume_locked(&mut meta, &branch, git_branch.clone(), git_commit.clone(), progress)
            .await?;
        if report.cancelled() {
            return Ok(report);
        }

        if let (Some(last), Some(context)) = (last_commit, context.as_ref()) {
            if last != context.commit {
                report.branch_switch =
                    self.switch_locked(&mut meta, &last, context, progress).await?;
                if report.cancelled() {
                    return Ok(report);
                }
            }
        }

        report.reconcile = Some(
            self.reconcile_locked(&mut meta, &branch, git_branch, git_commit, progress)
                .await?,
        );
        Ok(report)
    }

    /// Drops everything stored for this project and indexes every file.
    pub async fn force_full(&self, progress: &dyn ProgressSink) -> Result<IndexReport> {
        let mut meta = self.metadata.lock().await;
        let _run = self.begin_run();
        let (branch, context) = self.refresh_branch().await;
        let (git_branch, git_commit) = split_context(context.as_ref());

        info!("Full re-index of {}: clearing {}", self.root.display(), self.collection);
        self.store.clear_collection(&self.collection).await?;
        meta.reset().await?;

        let files = self.reconciler.repository_files().await?;
        meta.start_run(files.clone(), git_branch, git_commit.clone())
            .await?;
        let result = self.processor.process(&files, progress, &mut *meta).await;
        let stats = finish_run(&mut meta, result, |s| s.cancelled).await?;

        Ok(IndexReport {
            branch,
            commit: git_commit,
            full: Some(stats),
            ..IndexReport::default()
        })
    }

    pub async fn reconcile(&self, progress: &dyn ProgressSink) -> Result<ReconcileOutcome> {
        let mut meta = self.metadata.lock().await;
        let _run = self.begin_run();
        let (branch, context) = self.refresh_branch().await;
        let (git_branch, git_commit) = split_context(context.as_ref());
        self.reconcile_locked(&mut meta, &branch, git_branch, git_commit, progress)
            .await
    }

    /// Follows `HEAD` from `old_commit` to the current commit, after
    /// finishing an interrupted run. `branch_switch` stays `None` when git is
    /// unavailable or could not diff the two commits.
    pub async fn handle_branch_change(
        &self,
        old_commit: &str,
        progress: &dyn ProgressSink,
    ) -> Result<IndexReport> {
        let mut meta = self.metadata.lock().await;
        let _run = self.begin_run();
        let (branch, context) = self.refresh_branch().await;
        let (git_branch, git_commit) = split_context(context.as_ref());
        let mut report = IndexReport {
            branch: branch.clone(),
            commit: git_commit.clone(),
            ..IndexReport::default()
        };

        report.resumed = self
            .resume_locked(&mut meta, &branch, git_branch, git_commit, progress)
            .await?;
        if report.cancelled() {
            return Ok(report);
        }
        if let Some(context) = context.as_ref() {
            report.branch_switch = self
                .switch_locked(&mut meta, old_commit, context, progress)
                .await?;
        }
        Ok(report)
    }

    /// Indexes `paths` as one run: the unit of work of watch mode. Finishes
    /// an interrupted run first, then switches branch when `HEAD` moved since
    /// the last run, falling back to a reconcile when the switch cannot be
    /// diffed.
    pub async fn index_paths(
        &self,
        paths: &[String],
        progress: &dyn ProgressSink,
    ) -> Result<CycleOutcome> {
        let mut meta = self.metadata.lock().await;
        let _run = self.begin_run();
        let (branch, context) = self.refresh_branch().await;
        let (git_branch, git_commit) = split_context(context.as_ref());
        let mut cycle = CycleOutcome {
            branch: branch.clone(),
            commit: git_commit.clone(),
            changes: BranchIndexOutcome {
                branch: branch.clone(),
                ..BranchIndexOutcome::default()
            },
            ..CycleOutcome::default()
        };

        let last_commit = meta.record().git_commit.clone();
        cycle.resumed = self
            .resume_locked(&mut meta, &branch, git_branch.clone(), git_commit.clone(), progress)
            .await?;
        if cycle.totals().cancelled {
            return Ok(cycle);
        }

        if let (Some(last), Some(context)) = (last_commit, context.as_ref()) {
            if last != context.commit {
                cycle.branch_switch =
                    self.switch_locked(&mut meta, &last, context, progress).await?;
                if cycle.branch_switch.is_none() {
                    cycle.reconcile = Some(
                        self.reconcile_locked(
                            &mut meta,
                            &branch,
                            git_branch.clone(),
                            git_commit.clone(),
                            progress,
                        )
                        .await?,
                    );
                }
                if cycle.totals().cancelled {
                    return Ok(cycle);
                }
            }
        }

        if !paths.is_empty() {
            meta.start_run(paths.to_vec(), git_branch, git_commit).await?;
            let result = self
                .branch_indexer
                .index_changes(paths, &branch, progress, &mut *meta)
                .await;
            cycle.changes = finish_run(&mut meta, result, |o| o.stats.cancelled).await?;
        }
        Ok(cycle)
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let (branch, context) = self.refresh_branch().await;
        let points = self
            .store
            .scroll_points(&self.collection, &PointFilter::all())
            .await?;
        let visible_points = points.iter().filter(|p| p.is_visible_in(&branch)).count();
        let indexed_files = self
            .store
            .get_all_indexed_paths(&self.collection)
            .await?
            .len();
        let metadata = self.metadata.lock().await.get_status();

        Ok(EngineStatus {
            root: self.root.display().to_string(),
            project_id: self.project_id.clone(),
            collection: self.collection.clone(),
            store_backend: self.store.backend_name().to_string(),
            signature_strategy: self.resolver.strategy_name().to_string(),
            git_available: self.git.is_git_available(),
            branch,
            commit: context.map(|c| c.commit),
            indexed_files,
            points: points.len(),
            visible_points,
            metadata,
        })
    }

    /// Removes every point of this project and forgets run progress.
    pub async fn clear(&self) -> Result<()> {
        let mut meta = self.metadata.lock().await;
        self.store.clear_collection(&self.collection).await?;
        meta.reset().await?;
        info!("Cleared collection {}", self.collection);
        Ok(())
    }

    /// Finishes an interrupted run before a new one overwrites its target.
    async fn resume_locked(
        &self,
        meta: &mut MetadataStore,
        branch: &str,
        git_branch: Option<String>,
        git_commit: Option<String>,
        progress: &dyn ProgressSink,
    ) -> Result<Option<BranchIndexOutcome>> {
        if !meta.record().can_resume() {
            return Ok(None);
        }
        let remaining = meta.resume_run(git_branch, git_commit).await?;
        info!(
            "Resuming interrupted run: {} of {} files left",
            remaining.len(),
            meta.record().files_to_index.len()
        );
        let result = self
            .branch_indexer
            .index_changes(&remaining, branch, progress, &mut *meta)
            .await;
        finish_run(meta, result, |o| o.stats.cancelled)
            .await
            .map(Some)
    }

    async fn switch_locked(
        &self,
        meta: &mut MetadataStore,
        old_commit: &str,
        context: &BranchContext,
        progress: &dyn ProgressSink,
    ) -> Result<Option<BranchIndexOutcome>> {
        let Some(diff) = self.git.diff(old_commit, &context.commit).await else {
            warn!(
                "Cannot diff {old_commit}..{}; relying on reconcile",
                context.commit
            );
            return Ok(None);
        };
        meta.start_run(
            diff.paths().into_iter().collect(),
            Some(context.branch.clone()),
            Some(context.commit.clone()),
        )
        .await?;
        let result = self
            .branch_indexer
            .switch_branch(&diff, &context.branch, progress, &mut *meta)
            .await;
        finish_run(meta, result, |o| o.stats.cancelled)
            .await
            .map(Some)
    }

    async fn reconcile_locked(
        &self,
        meta: &mut MetadataStore,
        branch: &str,
        git_branch: Option<String>,
        git_commit: Option<String>,
        progress: &dyn ProgressSink,
    ) -> Result<ReconcileOutcome> {
        let plan = self.reconciler.plan(branch).await?;
        meta.start_run(plan.report.work_paths(), git_branch, git_commit)
            .await?;
        let result = self.reconciler.execute(plan, progress, &mut *meta).await;
        finish_run(meta, result, |o| o.stats().cancelled).await
    }
}

struct RunScope(CancellationFlag);

impl Drop for RunScope {
    fn drop(&mut self) {
        self.0.reset();
    }
}

fn split_context(context: Option<&BranchContext>) -> (Option<String>, Option<String>) {
    context.map_or((None, None), |c| {
        (Some(c.branch.clone()), Some(c.commit.clone()))
    })
}

/// Records how a run ended. Cancelled runs stay in progress, failed runs
/// keep their error; both remain resumable.
async fn finish_run<T>(
    meta: &mut MetadataStore,
    result: Result<T>,
    cancelled: impl Fn(&T) -> bool,
) -> Result<T> {
    match result {
        Ok(value) if cancelled(&value) => {
            meta.mark_interrupted(None).await?;
            Ok(value)
        }
        Ok(value) => {
            meta.mark_completed().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(meta_err) = meta.mark_interrupted(Some(&err.to_string())).await {
                warn!("Failed to record interrupted run: {meta_err}");
            }
            Err(err)
        }
    }
}
