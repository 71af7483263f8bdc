//! Full-scan realignment of the stored index with the working tree and the
//! checked-out branch.

use crate::branch::{is_complete_set, BranchAwareIndexer, BranchIndexOutcome};
use crate::identity::FileIdentityResolver;
use crate::persist::system_time_secs;
use crate::processor::{CompletionJournal, ProcessStats};
use crate::progress::ProgressSink;
use crate::scanner::FileScanner;
use crate::{IndexerError, Result};
use gitvec_vector_store::{ContentPoint, PointFilter, VectorStore};
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Corrections needed to bring the index in line with the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReconcileReport {
    /// In the repository, never indexed
    pub missing: BTreeSet<String>,
    /// Visible in the branch, gone from the repository
    pub stale: BTreeSet<String>,
    /// Modified since indexing, or without a complete point set
    pub outdated: BTreeSet<String>,
    /// Current content is stored but hidden in the branch
    pub to_unhide: BTreeSet<String>,
    /// Another version of the path is still visible in the branch
    pub superseded: BTreeSet<String>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.missing.len()
            + self.stale.len()
            + self.outdated.len()
            + self.to_unhide.len()
            + self.superseded.len()
    }

    /// Paths whose content has to be (re)indexed
    #[must_use]
    pub fn work_paths(&self) -> Vec<String> {
        self.missing.union(&self.outdated).cloned().collect()
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub branch: String,
    pub report: ReconcileReport,
    /// Current signature of every path in `to_unhide` and `superseded`
    signatures: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReconcileOutcome {
    pub report: ReconcileReport,
    pub points_unhidden: usize,
    pub changes: BranchIndexOutcome,
}

impl ReconcileOutcome {
    #[must_use]
    pub const fn stats(&self) -> &ProcessStats {
        &self.changes.stats
    }
}

pub struct ReconciliationEngine {
    scanner: FileScanner,
    store: Arc<dyn VectorStore>,
    collection: String,
    resolver: Arc<FileIdentityResolver>,
    branch_indexer: Arc<BranchAwareIndexer>,
    tolerance: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        scanner: FileScanner,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        resolver: Arc<FileIdentityResolver>,
        branch_indexer: Arc<BranchAwareIndexer>,
        tolerance: Duration,
    ) -> Self {
        Self {
            scanner,
            store,
            collection: collection.into(),
            resolver,
            branch_indexer,
            tolerance,
        }
    }

    /// Repository files as the scanner sees them right now
    pub async fn repository_files(&self) -> Result<Vec<String>> {
        let scanner = self.scanner.clone();
        tokio::task::spawn_blocking(move || scanner.find_files())
            .await
            .map_err(|e| IndexerError::Other(format!("file scan failed: {e}")))
    }

    pub async fn plan(&self, branch: &str) -> Result<ReconcilePlan> {
        let repository: BTreeSet<String> = self.repository_files().await?.into_iter().collect();
        let timestamps = self
            .store
            .get_file_index_timestamps(&self.collection)
            .await?;

        let mut by_path: HashMap<String, Vec<ContentPoint>> = HashMap::new();
        for point in self
            .store
            .scroll_points(&self.collection, &PointFilter::all())
            .await?
        {
            by_path
                .entry(point.payload.path.clone())
                .or_default()
                .push(point);
        }

        let mut report = ReconcileReport::default();
        let mut signatures = HashMap::new();

        for (path, points) in &by_path {
            if !repository.contains(path) && points.iter().any(|p| p.is_visible_in(branch)) {
                report.stale.insert(path.clone());
            }
        }

        let tolerance = self.tolerance.as_secs();
        for path in &repository {
            let Some(points) = by_path.get(path) else {
                report.missing.insert(path.clone());
                continue;
            };

            let Ok(meta) = tokio::fs::metadata(self.resolver.absolute(path)).await else {
                continue;
            };
            let mtime = meta.modified().map(system_time_secs).unwrap_or(0);
            let indexed_at = timestamps.get(path).copied().unwrap_or(0);
            if mtime > indexed_at.saturating_add(tolerance) {
                report.outdated.insert(path.clone());
                continue;
            }

            // one fully visible version and an old enough mtime: nothing to verify
            let versions: BTreeSet<&str> = points
                .iter()
                .map(|p| p.payload.content_signature.as_str())
                .collect();
            if versions.len() == 1 && points.iter().all(|p| p.is_visible_in(branch)) {
                if !is_complete_set(points) {
                    report.outdated.insert(path.clone());
                }
                continue;
            }

            let record = match self.resolver.resolve(path).await {
                Ok(record) => record,
                Err(IndexerError::FileUnreadable { .. }) => continue,
                Err(err) => return Err(err),
            };
            let signature = record.content_signature;
            let current: Vec<&ContentPoint> = points
                .iter()
                .filter(|p| p.payload.content_signature == signature)
                .collect();
            if !is_complete_set(current.iter().copied()) {
                report.outdated.insert(path.clone());
                continue;
            }
            if current.iter().any(|p| !p.is_visible_in(branch)) {
                report.to_unhide.insert(path.clone());
            }
            if points
                .iter()
                .any(|p| p.payload.content_signature != signature && p.is_visible_in(branch))
            {
                report.superseded.insert(path.clone());
            }
            signatures.insert(path.clone(), signature);
        }

        info!(
            "Reconcile plan for {branch}: {} missing, {} stale, {} outdated, {} to unhide, {} superseded",
            report.missing.len(),
            report.stale.len(),
            report.outdated.len(),
            report.to_unhide.len(),
            report.superseded.len()
        );

        Ok(ReconcilePlan {
            branch: branch.to_string(),
            report,
            signatures,
        })
    }

    /// Applies a plan: unhide, then (re)index, then retire superseded
    /// versions, then retire stale paths.
    pub async fn execute(
        &self,
        plan: ReconcilePlan,
        progress: &dyn ProgressSink,
        journal: &mut dyn CompletionJournal,
    ) -> Result<ReconcileOutcome> {
        let branch = plan.branch.as_str();
        let mut outcome = ReconcileOutcome {
            changes: BranchIndexOutcome {
                branch: branch.to_string(),
                ..BranchIndexOutcome::default()
            },
            ..ReconcileOutcome::default()
        };

        for path in &plan.report.to_unhide {
            if let Some(signature) = plan.signatures.get(path) {
                outcome.points_unhidden += self.branch_indexer.show(path, signature, branch).await?;
            }
        }

        let work = plan.report.work_paths();
        if !work.is_empty() {
            outcome.changes = self
                .branch_indexer
                .index_changes(&work, branch, progress, journal)
                .await?;
            if outcome.changes.stats.cancelled {
                outcome.report = plan.report;
                return Ok(outcome);
            }
        }

        for path in &plan.report.superseded {
            if let Some(signature) = plan.signatures.get(path) {
                let retired = self
                    .branch_indexer
                    .retire(path, Some(signature), branch)
                    .await?;
                outcome.changes.absorb_retire(retired);
            }
        }

        for path in &plan.report.stale {
            let retired = self.branch_indexer.retire(path, None, branch).await?;
            outcome.changes.absorb_retire(retired);
        }

        outcome.report = plan.report;
        Ok(outcome)
    }

    pub async fn reconcile(
        &self,
        branch: &str,
        progress: &dyn ProgressSink,
        journal: &mut dyn CompletionJournal,
    ) -> Result<ReconcileOutcome> {
        let plan = self.plan(branch).await?;
        self.execute(plan, progress, journal).await
    }
}
