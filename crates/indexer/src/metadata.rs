//! Durable, resumable record of an indexing run.
//!
//! A file enters `files_completed` only after all of its points were
//! committed. Flushes are batched, so after a crash the record may
//! under-report completion (those files are simply redone) but never
//! over-reports it.

use crate::persist::{read_json, unix_now_secs, write_json_atomic};
use crate::processor::{CommittedFile, CompletionJournal};
use crate::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const METADATA_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ProgressiveIndexMetadata {
    pub schema_version: u32,
    pub status: IndexStatus,
    pub collection: String,
    pub provider: String,
    pub model: String,
    /// Target paths of the current run
    #[serde(default)]
    pub files_to_index: Vec<String>,
    /// Path -> content signature of durably committed files
    #[serde(default)]
    pub files_completed: BTreeMap<String, String>,
    #[serde(default)]
    pub failed_files: BTreeSet<String>,
    #[serde(default)]
    pub chunks_indexed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

impl ProgressiveIndexMetadata {
    #[must_use]
    pub fn new(
        collection: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: METADATA_SCHEMA_VERSION,
            status: IndexStatus::NotStarted,
            collection: collection.into(),
            provider: provider.into(),
            model: model.into(),
            files_to_index: Vec::new(),
            files_completed: BTreeMap::new(),
            failed_files: BTreeSet::new(),
            chunks_indexed: 0,
            git_branch: None,
            git_commit: None,
            last_error: None,
            started_at: None,
            updated_at: None,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn matches_fingerprint(&self, provider: &str, model: &str) -> bool {
        self.provider == provider && self.model == model
    }

    #[must_use]
    pub fn remaining(&self) -> Vec<String> {
        remaining(&self.files_to_index, &self.files_completed)
    }

    #[must_use]
    pub fn can_resume(&self) -> bool {
        matches!(self.status, IndexStatus::InProgress | IndexStatus::Failed)
            && self
                .files_to_index
                .iter()
                .any(|f| !self.files_completed.contains_key(f))
    }
}

/// `target − completed`, in target order.
#[must_use]
pub fn remaining(target: &[String], completed: &BTreeMap<String, String>) -> Vec<String> {
    target
        .iter()
        .filter(|path| !completed.contains_key(*path))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct MetadataStatus {
    pub status: IndexStatus,
    pub can_resume: bool,
    pub files_to_index: usize,
    pub files_completed: usize,
    pub failed_files: usize,
    pub chunks_indexed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Owner of the on-disk metadata record; the single writer of a run.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    record: ProgressiveIndexMetadata,
    flush_every: usize,
    unflushed: usize,
}

impl MetadataStore {
    /// Loads the record for `collection`, starting fresh when it is missing,
    /// unreadable, from another schema version, or for another model.
    pub async fn load_or_init(
        path: impl AsRef<Path>,
        collection: &str,
        provider: &str,
        model: &str,
        flush_every: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let fresh = || ProgressiveIndexMetadata::new(collection, provider, model);

        let record = match read_json::<ProgressiveIndexMetadata>(&path).await {
            Ok(Some(record)) if record.schema_version != METADATA_SCHEMA_VERSION => {
                log::warn!(
                    "Metadata schema {} != {METADATA_SCHEMA_VERSION}; starting over",
                    record.schema_version
                );
                fresh()
            }
            Ok(Some(record)) if !record.matches_fingerprint(provider, model) => {
                log::info!(
                    "Embedding model changed ({}/{} -> {provider}/{model}); previous progress discarded",
                    record.provider,
                    record.model
                );
                fresh()
            }
            Ok(Some(record)) => record,
            Ok(None) => fresh(),
            Err(err) => {
                log::warn!("Unreadable metadata {}: {err}; starting over", path.display());
                fresh()
            }
        };

        Ok(Self {
            path,
            record,
            flush_every: flush_every.max(1),
            unflushed: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn record(&self) -> &ProgressiveIndexMetadata {
        &self.record
    }

    #[must_use]
    pub fn get_status(&self) -> MetadataStatus {
        MetadataStatus {
            status: self.record.status,
            can_resume: self.record.can_resume(),
            files_to_index: self.record.files_to_index.len(),
            files_completed: self.record.files_completed.len(),
            failed_files: self.record.failed_files.len(),
            chunks_indexed: self.record.chunks_indexed,
            last_error: self.record.last_error.clone(),
        }
    }

    /// Begins a new run over `target`, dropping the previous run's progress.
    pub async fn start_run(
        &mut self,
        target: Vec<String>,
        git_branch: Option<String>,
        git_commit: Option<String>,
    ) -> Result<()> {
        let now = unix_now_secs();
        let record = &mut self.record;
        record.status = IndexStatus::InProgress;
        record.files_to_index = target;
        record.files_completed.clear();
        record.failed_files.clear();
        record.chunks_indexed = 0;
        record.git_branch = git_branch;
        record.git_commit = git_commit;
        record.last_error = None;
        record.started_at = Some(now);
        record.updated_at = Some(now);
        record.completed_at = None;
        self.flush().await
    }

    /// Continues the interrupted run under the current git context.
    pub async fn resume_run(
        &mut self,
        git_branch: Option<String>,
        git_commit: Option<String>,
    ) -> Result<Vec<String>> {
        self.record.status = IndexStatus::InProgress;
        self.record.git_branch = git_branch;
        self.record.git_commit = git_commit;
        self.record.failed_files.clear();
        self.record.updated_at = Some(unix_now_secs());
        self.flush().await?;
        Ok(self.record.remaining())
    }

    pub async fn mark_file_completed(
        &mut self,
        path: &str,
        signature: &str,
        chunk_count: usize,
    ) -> Result<()> {
        self.record
            .files_completed
            .insert(path.to_string(), signature.to_string());
        self.record.failed_files.remove(path);
        self.record.chunks_indexed += chunk_count as u64;
        self.touch().await
    }

    pub async fn mark_file_failed(&mut self, path: &str) -> Result<()> {
        self.record.failed_files.insert(path.to_string());
        self.touch().await
    }

    /// Cancellation (`None`) leaves the run in progress; an error fails it.
    /// Either way the run stays resumable.
    pub async fn mark_interrupted(&mut self, error: Option<&str>) -> Result<()> {
        if let Some(error) = error {
            self.record.status = IndexStatus::Failed;
            self.record.last_error = Some(error.to_string());
        } else {
            self.record.status = IndexStatus::InProgress;
        }
        self.record.updated_at = Some(unix_now_secs());
        self.flush().await
    }

    pub async fn mark_completed(&mut self) -> Result<()> {
        let now = unix_now_secs();
        self.record.status = IndexStatus::Completed;
        self.record.updated_at = Some(now);
        self.record.completed_at = Some(now);
        self.flush().await
    }

    /// Back to `not_started`, keeping the fingerprint.
    pub async fn reset(&mut self) -> Result<()> {
        self.record = ProgressiveIndexMetadata::new(
            self.record.collection.clone(),
            self.record.provider.clone(),
            self.record.model.clone(),
        );
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<()> {
        write_json_atomic(&self.path, &self.record).await?;
        self.unflushed = 0;
        Ok(())
    }

    async fn touch(&mut self) -> Result<()> {
        self.record.updated_at = Some(unix_now_secs());
        self.unflushed += 1;
        if self.unflushed >= self.flush_every {
            self.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CompletionJournal for MetadataStore {
    async fn file_committed(&mut self, file: &CommittedFile) -> Result<()> {
        let chunks = if file.reused { 0 } else { file.chunk_count };
        self.mark_file_completed(&file.path, &file.content_signature, chunks)
            .await
    }

    async fn file_failed(&mut self, path: &str, _error: &str) -> Result<()> {
        self.mark_file_failed(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn remaining_is_target_minus_completed() {
        let target = paths(&["a", "b", "c"]);
        let completed: BTreeMap<String, String> = [("b".to_string(), "sig".to_string())].into();
        assert_eq!(remaining(&target, &completed), paths(&["a", "c"]));
        assert_eq!(remaining(&[], &completed), Vec::<String>::new());
    }

    #[tokio::test]
    async fn interrupted_run_is_resumable_after_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        {
            let mut store = MetadataStore::load_or_init(&path, "c", "hashing", "fnv-16", 1)
                .await
                .unwrap();
            store
                .start_run(paths(&["a", "b", "c"]), Some("main".into()), None)
                .await
                .unwrap();
            store.mark_file_completed("a", "s1", 2).await.unwrap();
            store.mark_interrupted(None).await.unwrap();
        }

        let store = MetadataStore::load_or_init(&path, "c", "hashing", "fnv-16", 1)
            .await
            .unwrap();
        let status = store.get_status();
        assert_eq!(status.status, IndexStatus::InProgress);
        assert!(status.can_resume);
        assert_eq!(status.files_completed, 1);
        assert_eq!(store.record().remaining(), paths(&["b", "c"]));
    }

    #[tokio::test]
    async fn fingerprint_mismatch_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        let mut store = MetadataStore::load_or_init(&path, "c", "hashing", "fnv-16", 1)
            .await
            .unwrap();
        store.start_run(paths(&["a"]), None, None).await.unwrap();
        store.mark_interrupted(Some("store down")).await.unwrap();
        assert!(store.record().can_resume());

        let other = MetadataStore::load_or_init(&path, "c", "ollama", "nomic", 1)
            .await
            .unwrap();
        assert_eq!(other.get_status().status, IndexStatus::NotStarted);
        assert!(!other.record().can_resume());
    }

    #[tokio::test]
    async fn lazy_flush_under_reports() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        let mut store = MetadataStore::load_or_init(&path, "c", "p", "m", 3)
            .await
            .unwrap();
        store.start_run(paths(&["a", "b", "c", "d"]), None, None).await.unwrap();
        store.mark_file_completed("a", "s", 1).await.unwrap();
        store.mark_file_completed("b", "s", 1).await.unwrap();

        let on_disk: ProgressiveIndexMetadata = read_json(&path).await.unwrap().unwrap();
        assert!(on_disk.files_completed.is_empty());

        store.mark_file_completed("c", "s", 1).await.unwrap();
        let on_disk: ProgressiveIndexMetadata = read_json(&path).await.unwrap().unwrap();
        assert_eq!(on_disk.files_completed.len(), 3);
        assert_eq!(on_disk.chunks_indexed, 3);
    }

    #[tokio::test]
    async fn completed_run_is_not_resumable() {
        let dir = TempDir::new().unwrap();
        let mut store = MetadataStore::load_or_init(dir.path().join("m.json"), "c", "p", "m", 10)
            .await
            .unwrap();
        store.start_run(paths(&["a", "b"]), None, None).await.unwrap();
        store.mark_file_completed("a", "s", 1).await.unwrap();
        store.mark_completed().await.unwrap();

        let status = store.get_status();
        assert_eq!(status.status, IndexStatus::Completed);
        assert!(!status.can_resume);
    }

    #[tokio::test]
    async fn corrupt_record_starts_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(&path, "{ nope").unwrap();
        let store = MetadataStore::load_or_init(&path, "c", "p", "m", 1).await.unwrap();
        assert_eq!(store.get_status().status, IndexStatus::NotStarted);
    }
}
