use crate::error::{Result, VectorStoreError};
use crate::point::{ContentPoint, PointFilter, VisibilityUpdate};
use crate::store::VectorStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Points of one collection, keyed by point id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Collection {
    pub dimensions: usize,
    pub points: BTreeMap<String, ContentPoint>,
}

impl Collection {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            points: BTreeMap::new(),
        }
    }

    pub fn validate_upsert(&self, points: &[ContentPoint]) -> Result<()> {
        match points.iter().find(|p| p.vector.len() != self.dimensions) {
            Some(bad) => Err(VectorStoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.vector.len(),
            }),
            None => Ok(()),
        }
    }

    /// Validates the whole batch before touching anything.
    pub fn upsert(&mut self, points: Vec<ContentPoint>) -> Result<()> {
        self.validate_upsert(&points)?;
        for point in points {
            self.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    pub fn scroll(&self, filter: &PointFilter) -> Vec<ContentPoint> {
        self.points
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect()
    }

    pub fn update_visibility(&mut self, updates: Vec<VisibilityUpdate>) -> usize {
        let mut applied = 0;
        for update in updates {
            let Some(point) = self.points.get_mut(&update.id) else {
                continue;
            };
            point.payload.hidden_branches = update.hidden_branches;
            if let Some(ts) = update.indexed_at {
                point.payload.indexed_at = ts;
            }
            applied += 1;
        }
        applied
    }

    pub fn delete(&mut self, filter: &PointFilter) -> usize {
        let before = self.points.len();
        self.points.retain(|_, p| !filter.matches(p));
        before - self.points.len()
    }
}

/// Process-local store; the reference backend for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_collection(&self, collection: &str, dimensions: usize) -> Result<()> {
        let mut guard = self.collections.write().await;
        guard
            .entry(collection.to_string())
            .or_insert_with(|| Collection::new(dimensions));
        Ok(())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn upsert_points(&self, collection: &str, points: Vec<ContentPoint>) -> Result<()> {
        let mut guard = self.collections.write().await;
        guard
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?
            .upsert(points)
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
            .scroll(filter))
    }

    async fn update_visibility(
        &self,
        collection: &str,
        updates: Vec<VisibilityUpdate>,
    ) -> Result<usize> {
        let mut guard = self.collections.write().await;
        Ok(guard
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?
            .update_visibility(updates))
    }

    async fn delete_by_filter(&self, collection: &str, filter: &PointFilter) -> Result<usize> {
        let mut guard = self.collections.write().await;
        Ok(guard
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?
            .delete(filter))
    }

    async fn clear_collection(&self, collection: &str) -> Result<()> {
        let mut guard = self.collections.write().await;
        if let Some(c) = guard.get_mut(collection) {
            c.points.clear();
        }
        Ok(())
    }
}
