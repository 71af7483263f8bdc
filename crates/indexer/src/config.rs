//! `<root>/.gitvec/config.toml`. Every section and field is optional.

use crate::{IndexerError, Result};
use gitvec_code_chunker::ChunkerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const STATE_DIR: &str = ".gitvec";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub scan: ScanConfig,
    pub processing: ProcessingConfig,
    pub chunking: ChunkerConfig,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Extension allow-list without the dot; empty admits every file.
    pub extensions: Vec<String>,
    /// Directory names skipped wherever they appear.
    pub exclude_dirs: Vec<String>,
    /// Glob patterns matched against project-relative paths.
    pub exclude_patterns: Vec<String>,
    pub max_file_size: u64,
    pub respect_gitignore: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: [
                "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "c", "h", "cc", "cpp",
                "hpp", "cs", "rb", "php", "swift", "scala", "sh", "md", "toml", "yaml", "yml",
                "json",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            exclude_dirs: [
                ".git",
                STATE_DIR,
                "target",
                "node_modules",
                "dist",
                "build",
                "__pycache__",
                ".venv",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            exclude_patterns: vec!["**/*.min.js".to_string(), "**/*.lock".to_string()],
            max_file_size: 1024 * 1024,
            respect_gitignore: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub worker_count: usize,
    /// Texts per embedding request
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Progressive metadata is flushed after this many completions
    pub metadata_flush_every: usize,
    /// Grace window for mtime-based outdated detection
    pub outdated_tolerance_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get().min(8))
                .unwrap_or(4),
            batch_size: 32,
            max_retries: 3,
            retry_base_delay_ms: 250,
            metadata_flush_every: 25,
            outdated_tolerance_secs: 5,
        }
    }
}

impl ProcessingConfig {
    #[must_use]
    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    #[must_use]
    pub const fn outdated_tolerance(&self) -> Duration {
        Duration::from_secs(self.outdated_tolerance_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    Hashing,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    pub model: Option<String>,
    pub dimensions: usize,
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Hashing,
            model: None,
            dimensions: 384,
            url: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Json,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Relative paths are resolved against the project root.
    pub path: Option<PathBuf>,
    pub collection_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Json,
            path: None,
            collection_prefix: "gitvec".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
    pub max_batch_wait_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 750,
            max_batch_wait_ms: 3000,
            poll_interval_ms: 2000,
        }
    }
}

impl IndexerConfig {
    /// Loads the project config, falling back to defaults when there is none.
    pub fn load(root: &Path) -> Result<Self> {
        let path = config_path(root);
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let config = Self::from_toml_str(&raw)?;
                log::debug!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(IndexerError::IoError(err)),
        }
    }

    /// Loads an explicit config file, which unlike [`load`](Self::load)
    /// has to exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.processing.worker_count == 0 {
            return Err(IndexerError::InvalidConfig(
                "processing.worker_count must be > 0".into(),
            ));
        }
        if self.processing.batch_size == 0 {
            return Err(IndexerError::InvalidConfig(
                "processing.batch_size must be > 0".into(),
            ));
        }
        if self.processing.metadata_flush_every == 0 {
            return Err(IndexerError::InvalidConfig(
                "processing.metadata_flush_every must be > 0".into(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(IndexerError::InvalidConfig(
                "embedding.dimensions must be > 0".into(),
            ));
        }
        if self.embedding.provider == EmbeddingBackend::Ollama && self.embedding.model.is_none() {
            return Err(IndexerError::InvalidConfig(
                "embedding.model must be set for the ollama provider".into(),
            ));
        }
        if self.scan.max_file_size == 0 {
            return Err(IndexerError::InvalidConfig(
                "scan.max_file_size must be > 0".into(),
            ));
        }
        self.chunking
            .validate()
            .map_err(|e| IndexerError::InvalidConfig(e.to_string()))?;
        Ok(())
    }

    #[must_use]
    pub fn store_dir(&self, root: &Path) -> PathBuf {
        match &self.store.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => state_dir(root).join("store"),
        }
    }

}

#[must_use]
pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

#[must_use]
pub fn config_path(root: &Path) -> PathBuf {
    state_dir(root).join(CONFIG_FILE)
}
