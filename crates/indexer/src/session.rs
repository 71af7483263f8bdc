use crate::persist::{read_json, unix_now_secs, write_json_atomic};
use crate::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Persisted state of a watch session.
///
/// `files_being_processed` is written before a cycle starts and cleared once
/// it finished cleanly, so a non-empty set on startup means the previous
/// session died mid-cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct WatchSessionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_commit: Option<String>,
    #[serde(default)]
    pub files_being_processed: BTreeSet<String>,
    #[serde(default)]
    pub cycles_completed: u64,
    #[serde(default)]
    pub cycles_failed: u64,
    #[serde(default)]
    pub files_processed: u64,
    #[serde(default)]
    pub chunks_created: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<u64>,
}

impl WatchSessionMetadata {
    pub async fn load(path: &Path) -> Result<Self> {
        match read_json(path).await {
            Ok(Some(meta)) => Ok(meta),
            Ok(None) => Ok(Self::default()),
            Err(err) => {
                log::warn!("Unreadable watch session {}: {err}; starting fresh", path.display());
                Ok(Self::default())
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self).await
    }

    /// Paths left over by an interrupted cycle
    #[must_use]
    pub fn pending_recovery(&self) -> Vec<String> {
        self.files_being_processed.iter().cloned().collect()
    }

    pub fn begin_session(&mut self) {
        self.session_started_at = Some(unix_now_secs());
    }

    pub fn begin_cycle(&mut self, paths: impl IntoIterator<Item = String>) {
        self.files_being_processed.extend(paths);
    }

    pub fn complete_cycle(
        &mut self,
        branch: Option<String>,
        commit: Option<String>,
        files_processed: usize,
        chunks_created: usize,
    ) {
        self.files_being_processed.clear();
        self.last_sync_timestamp = Some(unix_now_secs());
        self.current_branch = branch;
        self.current_commit = commit;
        self.cycles_completed += 1;
        self.files_processed += files_processed as u64;
        self.chunks_created += chunks_created as u64;
    }

    /// In-flight paths stay recorded for the next attempt.
    pub fn fail_cycle(&mut self) {
        self.cycles_failed += 1;
    }
}
