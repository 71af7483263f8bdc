//! Branch visibility on top of content-addressed points.
//!
//! Points never move between branches: a branch simply stops hiding them.
//! Changed paths are partitioned into content whose complete point set is
//! already stored (made visible, no embedding) and content that has to go
//! through the [`FileProcessor`].

use crate::git::BranchDiff;
use crate::identity::FileIdentityResolver;
use crate::persist::unix_now_secs;
use crate::processor::{
    CommittedFile, CompletionJournal, FileProcessor, ProcessStats, RecordingJournal,
};
use crate::progress::ProgressSink;
use crate::{IndexerError, Result};
use gitvec_vector_store::{ContentPoint, PointFilter, VectorStore, VisibilityUpdate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Above this many paths, classification reads the collection once instead
/// of issuing one query per path.
pub const BULK_CLASSIFY_THRESHOLD: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A complete point set for the current content already exists
    UnchangedContent,
    NewContent,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedChange {
    pub path: String,
    pub kind: ChangeKind,
    /// Current signature; `None` for deleted or unreadable files
    pub signature: Option<String>,
    /// Size of the stored point set for unchanged content
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BranchIndexOutcome {
    pub branch: String,
    pub reused_files: usize,
    pub removed_files: usize,
    pub points_shown: usize,
    pub points_hidden: usize,
    pub points_deleted: usize,
    pub stats: ProcessStats,
}

impl BranchIndexOutcome {
    pub fn absorb_retire(&mut self, retired: Retired) {
        self.points_hidden += retired.hidden;
        self.points_deleted += retired.deleted;
    }
}

/// Points taken out of a branch by [`BranchAwareIndexer::retire`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Retired {
    pub hidden: usize,
    pub deleted: usize,
}

/// Whether `points` (all of one path and signature) form a full chunk set.
#[must_use]
pub fn is_complete_set<'a>(points: impl IntoIterator<Item = &'a ContentPoint>) -> bool {
    let mut total = None;
    let mut seen = BTreeSet::new();
    for point in points {
        let expected = *total.get_or_insert(point.payload.total_chunks);
        if point.payload.total_chunks != expected || point.payload.chunk_index >= expected {
            return false;
        }
        seen.insert(point.payload.chunk_index);
    }
    total.is_some_and(|t| t > 0 && seen.len() == t)
}

pub struct BranchAwareIndexer {
    store: Arc<dyn VectorStore>,
    collection: String,
    resolver: Arc<FileIdentityResolver>,
    processor: Arc<FileProcessor>,
}

impl BranchAwareIndexer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        resolver: Arc<FileIdentityResolver>,
        processor: Arc<FileProcessor>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            resolver,
            processor,
        }
    }

    #[must_use]
    pub const fn processor(&self) -> &Arc<FileProcessor> {
        &self.processor
    }

    pub async fn classify(&self, path: &str) -> Result<ClassifiedChange> {
        let points = self
            .store
            .scroll_points(&self.collection, &PointFilter::for_path(path))
            .await?;
        self.classify_against(path, &points).await
    }

    pub async fn classify_all(&self, paths: &[String]) -> Result<Vec<ClassifiedChange>> {
        let mut out = Vec::with_capacity(paths.len());
        if paths.len() <= BULK_CLASSIFY_THRESHOLD {
            for path in paths {
                out.push(self.classify(path).await?);
            }
            return Ok(out);
        }

        let wanted: BTreeSet<&str> = paths.iter().map(String::as_str).collect();
        let mut by_path: HashMap<String, Vec<ContentPoint>> = HashMap::new();
        for point in self
            .store
            .scroll_points(&self.collection, &PointFilter::all())
            .await?
        {
            if wanted.contains(point.payload.path.as_str()) {
                by_path
                    .entry(point.payload.path.clone())
                    .or_default()
                    .push(point);
            }
        }
        for path in paths {
            let points = by_path.get(path).map_or(&[][..], Vec::as_slice);
            out.push(self.classify_against(path, points).await?);
        }
        Ok(out)
    }

    async fn classify_against(&self, path: &str, points: &[ContentPoint]) -> Result<ClassifiedChange> {
        let record = match self.resolver.resolve(path).await {
            Ok(record) => record,
            Err(IndexerError::FileUnreadable { .. }) => {
                // an existing but unreadable file is left to the processor,
                // which counts it as skipped
                let kind = if self.resolver.absolute(path).exists() {
                    ChangeKind::NewContent
                } else {
                    ChangeKind::Deleted
                };
                return Ok(ClassifiedChange {
                    path: path.to_string(),
                    kind,
                    signature: None,
                    chunk_count: 0,
                });
            }
            Err(err) => return Err(err),
        };

        let matching: Vec<&ContentPoint> = points
            .iter()
            .filter(|p| p.payload.content_signature == record.content_signature)
            .collect();
        let kind = if is_complete_set(matching.iter().copied()) {
            ChangeKind::UnchangedContent
        } else {
            ChangeKind::NewContent
        };
        Ok(ClassifiedChange {
            path: path.to_string(),
            kind,
            chunk_count: if kind == ChangeKind::UnchangedContent {
                matching.len()
            } else {
                0
            },
            signature: Some(record.content_signature),
        })
    }

    async fn apply(&self, updates: Vec<VisibilityUpdate>) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        Ok(self.store.update_visibility(&self.collection, updates).await?)
    }

    async fn hide_where(
        &self,
        path: &str,
        branch: &str,
        keep: impl Fn(&ContentPoint) -> bool + Send,
    ) -> Result<usize> {
        let visible = self
            .store
            .scroll_points(&self.collection, &PointFilter::for_path(path).visible_in(branch))
            .await?;
        let updates = visible
            .into_iter()
            .filter(|p| !keep(p))
            .map(|p| {
                let mut hidden = p.payload.hidden_branches;
                hidden.insert(branch.to_string());
                VisibilityUpdate {
                    id: p.id,
                    hidden_branches: hidden,
                    indexed_at: None,
                }
            })
            .collect();
        self.apply(updates).await
    }

    /// Hides every version of `path` in `branch`. Idempotent.
    pub async fn hide(&self, path: &str, branch: &str) -> Result<usize> {
        self.hide_where(path, branch, |_| false).await
    }

    /// Hides all versions of `path` other than `keep` in `branch`.
    pub async fn hide_except(&self, path: &str, keep: &str, branch: &str) -> Result<usize> {
        self.hide_where(path, branch, |p| p.payload.content_signature == keep)
            .await
    }

    /// Makes one version of `path` visible in `branch`. Idempotent.
    pub async fn show(&self, path: &str, signature: &str, branch: &str) -> Result<usize> {
        let hidden = self
            .store
            .scroll_points(
                &self.collection,
                &PointFilter::for_path(path)
                    .with_signature(signature)
                    .hidden_in(branch),
            )
            .await?;
        let updates = hidden
            .into_iter()
            .map(|p| {
                let mut hidden = p.payload.hidden_branches;
                hidden.remove(branch);
                VisibilityUpdate {
                    id: p.id,
                    hidden_branches: hidden,
                    indexed_at: None,
                }
            })
            .collect();
        self.apply(updates).await
    }

    /// [`show`](Self::show) that also stamps the points as freshly indexed,
    /// so mtime-based staleness checks see the reuse.
    pub async fn reuse(&self, path: &str, signature: &str, branch: &str) -> Result<usize> {
        let points = self
            .store
            .scroll_points(
                &self.collection,
                &PointFilter::for_path(path).with_signature(signature),
            )
            .await?;
        let now = unix_now_secs();
        let mut shown = 0;
        let updates = points
            .into_iter()
            .map(|p| {
                let mut hidden = p.payload.hidden_branches;
                if hidden.remove(branch) {
                    shown += 1;
                }
                VisibilityUpdate {
                    id: p.id,
                    hidden_branches: hidden,
                    indexed_at: Some(now),
                }
            })
            .collect();
        self.apply(updates).await?;
        Ok(shown)
    }

    /// Takes versions of `path` (all of them, or all but `keep`) out of
    /// `branch`: hidden in git projects, deleted otherwise.
    pub async fn retire(&self, path: &str, keep: Option<&str>, branch: &str) -> Result<Retired> {
        if self.resolver.is_git_aware() {
            let hidden = match keep {
                Some(keep) => self.hide_except(path, keep, branch).await?,
                None => self.hide(path, branch).await?,
            };
            return Ok(Retired { hidden, deleted: 0 });
        }

        let deleted = match keep {
            None => {
                self.store
                    .delete_by_filter(&self.collection, &PointFilter::for_path(path))
                    .await?
            }
            Some(keep) => {
                let stale: BTreeSet<String> = self
                    .store
                    .scroll_points(&self.collection, &PointFilter::for_path(path))
                    .await?
                    .into_iter()
                    .map(|p| p.payload.content_signature)
                    .filter(|s| s != keep)
                    .collect();
                let mut deleted = 0;
                for signature in stale {
                    deleted += self
                        .store
                        .delete_by_filter(
                            &self.collection,
                            &PointFilter::for_path(path).with_signature(signature),
                        )
                        .await?;
                }
                deleted
            }
        };
        Ok(Retired { hidden: 0, deleted })
    }

    /// Brings `paths` up to date in `branch`: reuse what is stored,
    /// embed what is new, retire what is gone.
    pub async fn index_changes(
        &self,
        paths: &[String],
        branch: &str,
        progress: &dyn ProgressSink,
        journal: &mut dyn CompletionJournal,
    ) -> Result<BranchIndexOutcome> {
        let mut outcome = BranchIndexOutcome {
            branch: branch.to_string(),
            ..BranchIndexOutcome::default()
        };
        let mut to_process = Vec::new();

        for change in self.classify_all(paths).await? {
            match (change.kind, change.signature) {
                (ChangeKind::UnchangedContent, Some(signature)) => {
                    outcome.points_shown += self.reuse(&change.path, &signature, branch).await?;
                    let retired = self.retire(&change.path, Some(&signature), branch).await?;
                    outcome.absorb_retire(retired);
                    outcome.reused_files += 1;
                    journal
                        .file_committed(&CommittedFile {
                            path: change.path,
                            content_signature: signature,
                            chunk_count: change.chunk_count,
                            reused: true,
                        })
                        .await?;
                }
                (ChangeKind::Deleted, _) => {
                    let retired = self.retire(&change.path, None, branch).await?;
                    outcome.absorb_retire(retired);
                    outcome.removed_files += 1;
                }
                _ => to_process.push(change.path),
            }
        }

        if outcome.reused_files > 0 || outcome.removed_files > 0 {
            log::info!(
                "Branch {branch}: reused {} files, removed {} files without embedding",
                outcome.reused_files,
                outcome.removed_files
            );
        }

        if !to_process.is_empty() {
            let mut recording = RecordingJournal::new(journal);
            let result = self
                .processor
                .process(&to_process, progress, &mut recording)
                .await;
            // older versions go even when the run stopped early
            for file in &recording.committed {
                let retired = self
                    .retire(&file.path, Some(&file.content_signature), branch)
                    .await?;
                outcome.absorb_retire(retired);
            }
            outcome.stats = result?;
        }

        Ok(outcome)
    }

    /// Re-aligns visibility after `HEAD` moved to `new_branch`, inspecting
    /// only the paths in `diff` (see [`crate::GitTopology::diff`]).
    pub async fn switch_branch(
        &self,
        diff: &BranchDiff,
        new_branch: &str,
        progress: &dyn ProgressSink,
        journal: &mut dyn CompletionJournal,
    ) -> Result<BranchIndexOutcome> {
        log::info!(
            "HEAD moved to {new_branch} ({} changed, {} added, {} deleted)",
            diff.changed.len(),
            diff.added.len(),
            diff.deleted.len()
        );
        let paths: Vec<String> = diff.paths().into_iter().collect();
        self.index_changes(&paths, new_branch, progress, journal)
            .await
    }
}
