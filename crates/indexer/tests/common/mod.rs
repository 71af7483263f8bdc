//! Shared fixtures for the engine tests

#![allow(dead_code)]

use async_trait::async_trait;
use gitvec_indexer::{IndexerConfig, IndexingEngine};
use gitvec_vector_store::{
    ContentPoint, EmbeddingProvider, HashingEmbedder, MemoryVectorStore, PointFilter,
    Result as StoreResult, VectorStore, VectorStoreError, VisibilityUpdate,
};
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Hashing embedder that counts every text it embeds, optionally sleeping
/// before each request
pub struct CountingEmbedder {
    inner: HashingEmbedder,
    texts: AtomicUsize,
    delay: Duration,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            inner: HashingEmbedder::new(32).unwrap(),
            texts: AtomicUsize::new(0),
            delay,
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn current_model(&self) -> &str {
        self.inner.current_model()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
        self.pause().await;
        self.texts.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> StoreResult<Vec<Vec<f32>>> {
        self.pause().await;
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }
}

/// Memory store whose upserts fail for one path
pub struct FailingStore {
    inner: Arc<MemoryVectorStore>,
    fail_path: String,
    error: fn() -> VectorStoreError,
}

#[async_trait]
impl VectorStore for FailingStore {
    fn backend_name(&self) -> &'static str {
        "failing"
    }

    async fn ensure_collection(&self, collection: &str, dimensions: usize) -> StoreResult<()> {
        self.inner.ensure_collection(collection, dimensions).await
    }

    async fn collection_exists(&self, collection: &str) -> StoreResult<bool> {
        self.inner.collection_exists(collection).await
    }

    async fn upsert_points(&self, collection: &str, points: Vec<ContentPoint>) -> StoreResult<()> {
        if points.iter().any(|p| p.payload.path == self.fail_path) {
            return Err((self.error)());
        }
        self.inner.upsert_points(collection, points).await
    }

    async fn scroll_points(
        &self,
        collection: &str,
        filter: &PointFilter,
    ) -> StoreResult<Vec<ContentPoint>> {
        self.inner.scroll_points(collection, filter).await
    }

    async fn update_visibility(
        &self,
        collection: &str,
        updates: Vec<VisibilityUpdate>,
    ) -> StoreResult<usize> {
        self.inner.update_visibility(collection, updates).await
    }

    async fn delete_by_filter(&self, collection: &str, filter: &PointFilter) -> StoreResult<usize> {
        self.inner.delete_by_filter(collection, filter).await
    }

    async fn clear_collection(&self, collection: &str) -> StoreResult<()> {
        self.inner.clear_collection(collection).await
    }
}

pub struct Harness {
    pub engine: IndexingEngine,
    pub store: Arc<MemoryVectorStore>,
    pub embedder: Arc<CountingEmbedder>,
}

impl Harness {
    pub async fn points(&self, path: &str) -> Vec<ContentPoint> {
        self.store
            .scroll_points(self.engine.collection(), &PointFilter::for_path(path))
            .await
            .unwrap()
    }

    pub async fn all_points(&self) -> Vec<ContentPoint> {
        self.store
            .scroll_points(self.engine.collection(), &PointFilter::all())
            .await
            .unwrap()
    }

    /// Signatures of `path` visible in `branch`
    pub async fn visible_signatures(&self, path: &str, branch: &str) -> Vec<String> {
        let mut signatures: Vec<String> = self
            .points(path)
            .await
            .into_iter()
            .filter(|p| p.is_visible_in(branch))
            .map(|p| p.payload.content_signature)
            .collect();
        signatures.sort();
        signatures.dedup();
        signatures
    }
}

pub fn test_config() -> IndexerConfig {
    let mut config = IndexerConfig::default();
    config.processing.worker_count = 2;
    config.processing.batch_size = 8;
    config.processing.retry_base_delay_ms = 1;
    config
}

pub async fn open(root: &Path) -> Harness {
    open_with(root, test_config()).await
}

pub async fn open_with(root: &Path, config: IndexerConfig) -> Harness {
    let store = Arc::new(MemoryVectorStore::new());
    let backend = Arc::clone(&store) as Arc<dyn VectorStore>;
    assemble(root, config, store, backend, CountingEmbedder::new()).await
}

/// Engine whose embedder sleeps `delay` before every request
pub async fn open_slow(root: &Path, config: IndexerConfig, delay: Duration) -> Harness {
    let store = Arc::new(MemoryVectorStore::new());
    let backend = Arc::clone(&store) as Arc<dyn VectorStore>;
    assemble(root, config, store, backend, CountingEmbedder::with_delay(delay)).await
}

/// Engine whose store rejects every commit of `fail_path` with `error`
pub async fn open_failing(
    root: &Path,
    config: IndexerConfig,
    fail_path: &str,
    error: fn() -> VectorStoreError,
) -> Harness {
    let store = Arc::new(MemoryVectorStore::new());
    let backend = Arc::new(FailingStore {
        inner: Arc::clone(&store),
        fail_path: fail_path.to_string(),
        error,
    }) as Arc<dyn VectorStore>;
    assemble(root, config, store, backend, CountingEmbedder::new()).await
}

async fn assemble(
    root: &Path,
    config: IndexerConfig,
    store: Arc<MemoryVectorStore>,
    backend: Arc<dyn VectorStore>,
    embedder: CountingEmbedder,
) -> Harness {
    let embedder = Arc::new(embedder);
    let engine = IndexingEngine::open(
        root,
        config,
        backend,
        Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>,
    )
    .await
    .unwrap();
    Harness {
        engine,
        store,
        embedder,
    }
}

pub fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub fn python_source(name: &str, lines: usize) -> String {
    let mut out = String::new();
    for i in 0..lines {
        out.push_str(&format!("def {name}_{i}(value):\n    return value + {i}\n"));
    }
    out
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

pub fn git(root: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=gitvec",
            "-c",
            "user.email=gitvec@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(root)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// `git init` on a `main` branch
pub fn init_repo(root: &Path) {
    git(root, &["init", "-q"]);
    git(root, &["checkout", "-q", "-b", "main"]);
}

pub fn commit_all(root: &Path, message: &str) {
    git(root, &["add", "-A"]);
    git(root, &["commit", "-q", "-m", message]);
}
