use anyhow::{Context, Result};
use gitvec_indexer::{config_path, EmbeddingBackend, IndexerConfig, IndexingEngine, StoreBackend};
use gitvec_vector_store::{
    EmbeddingProvider, HashingEmbedder, JsonFileStore, MemoryVectorStore, OllamaEmbedder,
    VectorStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Project root plus the config that applies to it
pub struct CommandContext {
    pub root: PathBuf,
    pub config: IndexerConfig,
    /// Config file actually read, if any
    pub config_path: Option<PathBuf>,
}

impl CommandContext {
    pub fn load(root: &Path, explicit_config: Option<&Path>) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("project root {} not found", root.display()))?;

        let (config, config_path) = match explicit_config {
            Some(path) => (
                IndexerConfig::load_from(path)
                    .with_context(|| format!("failed to load config {}", path.display()))?,
                Some(path.to_path_buf()),
            ),
            None => {
                let default_path = config_path(&root);
                let config = IndexerConfig::load(&root)
                    .with_context(|| format!("failed to load {}", default_path.display()))?;
                (config, default_path.exists().then_some(default_path))
            }
        };

        Ok(Self {
            root,
            config,
            config_path,
        })
    }

    pub async fn open_engine(&self) -> Result<IndexingEngine> {
        let store = self.open_store().await?;
        let embedder = self.embedder()?;
        IndexingEngine::open(&self.root, self.config.clone(), store, embedder)
            .await
            .with_context(|| format!("failed to open index for {}", self.root.display()))
    }

    async fn open_store(&self) -> Result<Arc<dyn VectorStore>> {
        Ok(match self.config.store.backend {
            StoreBackend::Json => {
                let dir = self.config.store_dir(&self.root);
                let store = JsonFileStore::open(&dir)
                    .await
                    .with_context(|| format!("failed to open store at {}", dir.display()))?;
                Arc::new(store)
            }
            StoreBackend::Memory => {
                log::warn!("Using the in-memory store; nothing will be persisted");
                Arc::new(MemoryVectorStore::new())
            }
        })
    }

    fn embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let cfg = &self.config.embedding;
        Ok(match cfg.provider {
            EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(cfg.dimensions)?),
            EmbeddingBackend::Ollama => {
                let model = cfg
                    .model
                    .clone()
                    .context("embedding.model is required for the ollama provider")?;
                Arc::new(OllamaEmbedder::new(
                    cfg.url.as_deref(),
                    model,
                    cfg.dimensions,
                    Duration::from_secs(cfg.timeout_secs),
                )?)
            }
        })
    }

    pub fn config_path_display(&self) -> Option<String> {
        self.config_path
            .as_ref()
            .map(|path| path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let ctx = CommandContext::load(dir.path(), None).unwrap();
        assert!(ctx.config_path.is_none());
        assert_eq!(ctx.config, IndexerConfig::default());
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(CommandContext::load(dir.path(), Some(&missing)).is_err());
    }

    #[test]
    fn explicit_config_is_validated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gitvec.toml");
        std::fs::write(&path, "[processing]\nworker_count = 0\n").unwrap();
        let err = CommandContext::load(dir.path(), Some(&path))
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("worker_count"));
    }

    #[tokio::test]
    async fn opens_memory_backed_engine() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gitvec.toml");
        std::fs::write(&path, "[store]\nbackend = \"memory\"\n").unwrap();
        let ctx = CommandContext::load(dir.path(), Some(&path)).unwrap();
        let engine = ctx.open_engine().await.unwrap();
        assert_eq!(engine.status().await.unwrap().store_backend, "memory");
    }
}
