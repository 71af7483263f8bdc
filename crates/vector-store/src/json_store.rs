use crate::error::{Result, VectorStoreError};
use crate::memory::Collection;
use crate::point::{ContentPoint, PointFilter, VisibilityUpdate};
use crate::store::VectorStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Log entries written before the collection is folded into its snapshot
pub const DEFAULT_COMPACT_AFTER: usize = 256;

/// Local store keeping, per collection, a JSON snapshot plus an append-only
/// log of the mutations made since.
///
/// A mutating call is validated, appended to `<collection>.log` as one JSON
/// line and only then applied in memory, so a failed write leaves the
/// collection at its previous state. Every `compact_after` entries the
/// snapshot is rewritten (temp file, then rename) and the log emptied.
/// Entries carry a sequence number: on open, entries already folded into the
/// snapshot are skipped and a torn trailing line is dropped.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    compact_after: usize,
    collections: RwLock<HashMap<String, Stored>>,
}

#[derive(Debug)]
struct Stored {
    data: Collection,
    /// Sequence number of the last applied log entry
    seq: u64,
    since_snapshot: usize,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    seq: u64,
    collection: Collection,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    seq: u64,
    collection: &'a Collection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Operation {
    Upsert(Vec<ContentPoint>),
    Visibility(Vec<VisibilityUpdate>),
    Delete(PointFilter),
    Clear,
}

impl Operation {
    fn validate(&self, data: &Collection) -> Result<()> {
        match self {
            Self::Upsert(points) => data.validate_upsert(points),
            _ => Ok(()),
        }
    }

    /// Returns the number of points touched.
    fn apply(self, data: &mut Collection) -> Result<usize> {
        match self {
            Self::Upsert(points) => {
                let count = points.len();
                data.upsert(points)?;
                Ok(count)
            }
            Self::Visibility(updates) => Ok(data.update_visibility(updates)),
            Self::Delete(filter) => Ok(data.delete(&filter)),
            Self::Clear => {
                let count = data.points.len();
                data.points.clear();
                Ok(count)
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    seq: u64,
    op: Operation,
}

impl JsonFileStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut collections = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await?;
            let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|err| {
                VectorStoreError::Other(format!(
                    "corrupt collection file {}: {err}",
                    path.display()
                ))
            })?;

            let mut stored = Stored {
                data: snapshot.collection,
                seq: snapshot.seq,
                since_snapshot: 0,
            };
            let log_path = path.with_extension("log");
            let replayed = replay(&log_path, &mut stored).await?;
            if replayed > 0 || has_content(&log_path).await? {
                // fold the log in now, so later appends never follow a torn line
                write_snapshot(&path, &stored).await?;
                tokio::fs::write(&log_path, b"").await?;
            }
            log::debug!(
                "Loaded collection {name} ({} points, {replayed} log entries replayed)",
                stored.data.points.len()
            );
            collections.insert(name.to_string(), stored);
        }

        Ok(Self {
            dir,
            compact_after: DEFAULT_COMPACT_AFTER,
            collections: RwLock::new(collections),
        })
    }

    #[must_use]
    pub fn with_compact_after(mut self, entries: usize) -> Self {
        self.compact_after = entries.max(1);
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_safe(collection)))
    }

    fn log_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.log", file_safe(collection)))
    }

    async fn compact(&self, collection: &str, stored: &mut Stored) -> Result<()> {
        write_snapshot(&self.snapshot_path(collection), stored).await?;
        tokio::fs::write(self.log_path(collection), b"").await?;
        stored.since_snapshot = 0;
        Ok(())
    }

    /// Validate, log, then apply.
    async fn record(&self, collection: &str, op: Operation) -> Result<usize> {
        let mut guard = self.collections.write().await;
        let stored = guard
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;
        op.validate(&stored.data)?;

        let entry = LogEntry {
            seq: stored.seq + 1,
            op,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        if let Err(err) = append(&self.log_path(collection), &line).await {
            // a partial line must not prefix the next entry
            if let Err(reset) = self.compact(collection, stored).await {
                log::warn!("Failed to reset log of {collection}: {reset}");
            }
            return Err(err);
        }

        stored.seq = entry.seq;
        stored.since_snapshot += 1;
        let touched = entry.op.apply(&mut stored.data)?;
        if stored.since_snapshot >= self.compact_after {
            if let Err(err) = self.compact(collection, stored).await {
                log::warn!("Compaction of {collection} failed, keeping the log: {err}");
            }
        }
        Ok(touched)
    }
}

async fn append(path: &Path, line: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line).await?;
    file.flush().await?;
    Ok(())
}

async fn write_snapshot(path: &Path, stored: &Stored) -> Result<()> {
    let bytes = serde_json::to_vec(&SnapshotRef {
        seq: stored.seq,
        collection: &stored.data,
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn has_content(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len() > 0),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Applies the log entries newer than the snapshot. Returns how many.
async fn replay(path: &Path, stored: &mut Stored) -> Result<usize> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    let mut applied = 0;
    for line in bytes.split(|b| *b == b'\n').filter(|line| !line.is_empty()) {
        let entry: LogEntry = match serde_json::from_slice(line) {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("Dropping unreadable tail of {}: {err}", path.display());
                break;
            }
        };
        if entry.seq <= stored.seq {
            continue;
        }
        stored.seq = entry.seq;
        entry.op.apply(&mut stored.data)?;
        applied += 1;
    }
    Ok(applied)
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[async_trait]
impl VectorStore for JsonFileStore {
    fn backend_name(&self) -> &'static str {
        "json-file"
    }

    async fn ensure_collection(&self, collection: &str, dimensions: usize) -> Result<()> {
        let mut guard = self.collections.write().await;
        if let Some(existing) = guard.get(collection) {
            if existing.data.dimensions != dimensions {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: existing.data.dimensions,
                    actual: dimensions,
                });
            }
            return Ok(());
        }
        let mut created = Stored {
            data: Collection::new(dimensions),
            seq: 0,
            since_snapshot: 0,
        };
        self.compact(collection, &mut created).await?;
        guard.insert(collection.to_string(), created);
        Ok(())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn upsert_points(&self, collection: &str, points: Vec<ContentPoint>) -> Result<()> {
        self.record(collection, Operation::Upsert(points)).await?;
        Ok(())
    }

    async fn scroll_points(
        &self,
        collection: &str,
        filter: &PointFilter,
    ) -> Result<Vec<ContentPoint>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?
            .data
            .scroll(filter))
    }

    async fn update_visibility(
        &self,
        collection: &str,
        updates: Vec<VisibilityUpdate>,
    ) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        self.record(collection, Operation::Visibility(updates)).await
    }

    async fn delete_by_filter(&self, collection: &str, filter: &PointFilter) -> Result<usize> {
        self.record(collection, Operation::Delete(filter.clone()))
            .await
    }

    async fn clear_collection(&self, collection: &str) -> Result<()> {
        if !self.collection_exists(collection).await? {
            return Ok(());
        }
        self.record(collection, Operation::Clear).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::fixtures::point;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn reopen_sees_committed_points() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonFileStore::open(dir.path()).await.unwrap();
            store.ensure_collection("proj_hash_model", 3).await.unwrap();
            store
                .upsert_points(
                    "proj_hash_model",
                    vec![point("a", "x.rs", "s", 0, 2), point("b", "x.rs", "s", 1, 2)],
                )
                .await
                .unwrap();
        }

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        let points = reopened
            .scroll_points("proj_hash_model", &PointFilter::for_path("x.rs"))
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
        assert!(!dir.path().join("proj_hash_model.json.tmp").exists());
    }

    #[tokio::test]
    async fn failed_upsert_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        store.ensure_collection("c", 3).await.unwrap();
        let mut bad = point("b", "x.rs", "s", 1, 2);
        bad.vector = vec![0.0; 7];

        assert!(store
            .upsert_points("c", vec![point("a", "x.rs", "s", 0, 2), bad])
            .await
            .is_err());

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.count_points("c", &PointFilter::all()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn ensure_collection_rejects_dimension_change() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        store.ensure_collection("c", 3).await.unwrap();
        assert!(store.ensure_collection("c", 3).await.is_ok());
        assert!(store.ensure_collection("c", 8).await.is_err());
    }

    async fn upsert_one(store: &JsonFileStore, id: &str, path: &str) {
        store
            .upsert_points("c", vec![point(id, path, "s", 0, 1)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn log_is_replayed_on_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonFileStore::open(dir.path()).await.unwrap();
            store.ensure_collection("c", 3).await.unwrap();
            upsert_one(&store, "a", "a.rs").await;
            upsert_one(&store, "b", "b.rs").await;
            store
                .update_visibility(
                    "c",
                    vec![VisibilityUpdate {
                        id: "a".into(),
                        hidden_branches: ["main".to_string()].into(),
                        indexed_at: None,
                    }],
                )
                .await
                .unwrap();
            store
                .delete_by_filter("c", &PointFilter::for_path("b.rs"))
                .await
                .unwrap();
            let log = std::fs::read_to_string(dir.path().join("c.log")).unwrap();
            assert_eq!(log.lines().count(), 4);
        }

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        let points = reopened.scroll_points("c", &PointFilter::all()).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].id, "a");
        assert!(!points[0].is_visible_in("main"));
        // replayed entries were folded into the snapshot
        assert_eq!(std::fs::read(dir.path().join("c.log")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn compaction_empties_the_log() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path())
            .await
            .unwrap()
            .with_compact_after(2);
        store.ensure_collection("c", 3).await.unwrap();

        upsert_one(&store, "a", "a.rs").await;
        upsert_one(&store, "b", "b.rs").await;
        assert_eq!(std::fs::read(dir.path().join("c.log")).unwrap().len(), 0);
        upsert_one(&store, "c", "c.rs").await;
        let log = std::fs::read_to_string(dir.path().join("c.log")).unwrap();
        assert_eq!(log.lines().count(), 1);

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.count_points("c", &PointFilter::all()).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn torn_log_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonFileStore::open(dir.path()).await.unwrap();
            store.ensure_collection("c", 3).await.unwrap();
            upsert_one(&store, "a", "a.rs").await;
        }
        let mut log = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("c.log"))
            .unwrap();
        std::io::Write::write_all(&mut log, b"{\"seq\":2,\"op\":{\"upsert\":[").unwrap();
        drop(log);

        {
            let store = JsonFileStore::open(dir.path()).await.unwrap();
            assert_eq!(store.count_points("c", &PointFilter::all()).await.unwrap(), 1);
            upsert_one(&store, "b", "b.rs").await;
        }
        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.count_points("c", &PointFilter::all()).await.unwrap(),
            2
        );
    }
}
