//! Storage abstraction used by the indexing engine.
//!
//! Every mutating call is atomic on its own: a backend either applies the
//! whole batch passed to [`VectorStore::upsert_points`] or none of it. The
//! engine relies on that to get file-level atomicity by committing each file
//! in a single call; it never locks the store itself.

use crate::error::Result;
use crate::point::{ContentPoint, PointFilter, VisibilityUpdate};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend label for logs
    fn backend_name(&self) -> &'static str;

    /// Create the collection if it does not exist yet.
    async fn ensure_collection(&self, collection: &str, dimensions: usize) -> Result<()>;

    async fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// Insert or replace points by id, all or nothing.
    async fn upsert_points(&self, collection: &str, points: Vec<ContentPoint>) -> Result<()>;

    async fn scroll_points(&self, collection: &str, filter: &PointFilter)
        -> Result<Vec<ContentPoint>>;

    /// Apply payload-only visibility updates, all or nothing. Ids that no
    /// longer exist are skipped. Returns the number of points updated.
    async fn update_visibility(
        &self,
        collection: &str,
        updates: Vec<VisibilityUpdate>,
    ) -> Result<usize>;

    /// Returns the number of points removed.
    async fn delete_by_filter(&self, collection: &str, filter: &PointFilter) -> Result<usize>;

    /// Remove every point, keeping the collection itself.
    async fn clear_collection(&self, collection: &str) -> Result<()>;

    async fn count_points(&self, collection: &str, filter: &PointFilter) -> Result<usize> {
        Ok(self.scroll_points(collection, filter).await?.len())
    }

    async fn get_all_indexed_paths(&self, collection: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .scroll_points(collection, &PointFilter::all())
            .await?
            .into_iter()
            .map(|p| p.payload.path)
            .collect())
    }

    /// Latest `indexed_at` per path, across all versions of the path.
    async fn get_file_index_timestamps(&self, collection: &str) -> Result<HashMap<String, u64>> {
        let mut out: HashMap<String, u64> = HashMap::new();
        for point in self.scroll_points(collection, &PointFilter::all()).await? {
            let entry = out.entry(point.payload.path).or_insert(0);
            *entry = (*entry).max(point.payload.indexed_at);
        }
        Ok(out)
    }
}
