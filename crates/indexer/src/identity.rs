//! Stable file identity: project id, per-file content signature and the
//! deterministic id of every chunk point derived from them.

use crate::git::{BranchContext, GitTopology};
use crate::persist::system_time_secs;
use crate::{IndexerError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Branch name used for every point when the project is not a git work tree.
/// `~` cannot appear in a git ref, so it never collides with a real branch.
pub const WORKSPACE_BRANCH: &str = "~workspace";

/// Where a file's identity came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContext {
    Git(BranchContext),
    Filesystem { mtime: u64, size: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub project_id: String,
    pub content_signature: String,
    pub context: FileContext,
    /// Set once the record has been committed
    pub indexed_at: Option<u64>,
}

impl FileRecord {
    #[must_use]
    pub fn git_context(&self) -> Option<&BranchContext> {
        match &self.context {
            FileContext::Git(ctx) => Some(ctx),
            FileContext::Filesystem { .. } => None,
        }
    }
}

/// Computes a content signature for the bytes of one file.
#[async_trait]
pub trait SignatureStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether signatures match git blob ids (and branches are meaningful).
    fn is_git_aware(&self) -> bool;

    async fn signature(&self, relative: &str, content: &[u8]) -> String;
}

/// SHA-256 of the raw bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHashSignatureStrategy;

#[async_trait]
impl SignatureStrategy for ContentHashSignatureStrategy {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn is_git_aware(&self) -> bool {
        false
    }

    async fn signature(&self, _relative: &str, content: &[u8]) -> String {
        sha256_hex(content)
    }
}

/// Git blob hash, identical across branches for identical content.
///
/// Falls back to a content hash for a file when git stops answering.
pub struct GitSignatureStrategy {
    git: Arc<GitTopology>,
}

impl GitSignatureStrategy {
    #[must_use]
    pub const fn new(git: Arc<GitTopology>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl SignatureStrategy for GitSignatureStrategy {
    fn name(&self) -> &'static str {
        "git-blob"
    }

    fn is_git_aware(&self) -> bool {
        true
    }

    async fn signature(&self, relative: &str, content: &[u8]) -> String {
        match self.git.hash_content(relative, content).await {
            Some(hash) => hash,
            None => sha256_hex(content),
        }
    }
}

pub struct FileIdentityResolver {
    root: PathBuf,
    project_id: String,
    strategy: Box<dyn SignatureStrategy>,
    branch: RwLock<Option<BranchContext>>,
}

impl FileIdentityResolver {
    #[must_use]
    pub fn new(
        root: impl AsRef<Path>,
        project_id: impl Into<String>,
        strategy: Box<dyn SignatureStrategy>,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            project_id: project_id.into(),
            strategy,
            branch: RwLock::new(None),
        }
    }

    /// Picks the git strategy when git answered the startup probe.
    #[must_use]
    pub fn for_topology(project_id: impl Into<String>, git: &Arc<GitTopology>) -> Self {
        let strategy: Box<dyn SignatureStrategy> = if git.is_git_available() {
            Box::new(GitSignatureStrategy::new(Arc::clone(git)))
        } else {
            Box::new(ContentHashSignatureStrategy)
        };
        log::debug!("Using {} signatures", strategy.name());
        Self::new(git.root(), project_id, strategy)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    #[must_use]
    pub fn is_git_aware(&self) -> bool {
        self.strategy.is_git_aware()
    }

    /// Branch/commit stamped onto records resolved from now on.
    pub fn set_branch_context(&self, context: Option<BranchContext>) {
        *self.branch.write().unwrap_or_else(PoisonError::into_inner) = context;
    }

    #[must_use]
    pub fn branch_context(&self) -> Option<BranchContext> {
        self.branch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Branch that visibility is evaluated against.
    #[must_use]
    pub fn current_branch(&self) -> String {
        if !self.is_git_aware() {
            return WORKSPACE_BRANCH.to_string();
        }
        self.branch_context()
            .map_or_else(|| WORKSPACE_BRANCH.to_string(), |ctx| ctx.branch)
    }

    #[must_use]
    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub async fn resolve(&self, relative: &str) -> Result<FileRecord> {
        Ok(self.resolve_with_content(relative).await?.0)
    }

    /// Reads the file once and derives the record from exactly those bytes.
    pub async fn resolve_with_content(&self, relative: &str) -> Result<(FileRecord, Vec<u8>)> {
        let path = self.absolute(relative);
        let unreadable = |source| IndexerError::FileUnreadable {
            path: relative.to_string(),
            source,
        };
        let meta = tokio::fs::metadata(&path).await.map_err(unreadable)?;
        let content = tokio::fs::read(&path).await.map_err(unreadable)?;

        let content_signature = self.strategy.signature(relative, &content).await;
        let context = match (self.is_git_aware(), self.branch_context()) {
            (true, Some(ctx)) => FileContext::Git(ctx),
            _ => FileContext::Filesystem {
                mtime: meta.modified().map(system_time_secs).unwrap_or(0),
                size: content.len() as u64,
            },
        };

        Ok((
            FileRecord {
                path: relative.to_string(),
                project_id: self.project_id.clone(),
                content_signature,
                context,
                indexed_at: None,
            },
            content,
        ))
    }

    /// Deterministic, UUID-formatted id of one chunk of a file version.
    #[must_use]
    pub fn create_point_id(record: &FileRecord, chunk_index: usize) -> String {
        point_id(
            &record.project_id,
            &record.path,
            &record.content_signature,
            chunk_index,
        )
    }
}

#[must_use]
pub fn point_id(project_id: &str, path: &str, signature: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update([0]);
    hasher.update(path.as_bytes());
    hasher.update([0]);
    hasher.update(signature.as_bytes());
    hasher.update([0]);
    hasher.update(chunk_index.to_le_bytes());
    let digest = hasher.finalize();

    let hex = to_hex(&digest[..16]);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Stable project id from the canonical root path.
pub fn compute_project_id(root: &Path) -> Result<String> {
    let canonical = root.canonicalize().map_err(|e| {
        IndexerError::InvalidPath(format!("{}: {e}", root.display()))
    })?;
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    Ok(to_hex(&digest[..8]))
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn resolver(root: &Path) -> FileIdentityResolver {
        FileIdentityResolver::new(root, "proj", Box::new(ContentHashSignatureStrategy))
    }

    #[tokio::test]
    async fn identical_bytes_share_a_signature() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn a() {}\n").unwrap();
        let resolver = resolver(dir.path());

        let a = resolver.resolve("a.rs").await.unwrap();
        let b = resolver.resolve("b.rs").await.unwrap();

        assert_eq!(a.content_signature, b.content_signature);
        assert_eq!(a.content_signature, sha256_hex(b"fn a() {}\n"));
        assert!(matches!(a.context, FileContext::Filesystem { size: 10, .. }));
    }

    #[tokio::test]
    async fn missing_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let err = resolver(dir.path()).resolve("gone.rs").await.unwrap_err();
        assert!(matches!(err, IndexerError::FileUnreadable { ref path, .. } if path == "gone.rs"));
        assert!(!err.is_systemic());
    }

    #[test]
    fn point_ids_are_deterministic_uuids() {
        let a = point_id("proj", "src/a.rs", "sig", 0);
        assert_eq!(a, point_id("proj", "src/a.rs", "sig", 0));
        assert_eq!(a.len(), 36);
        assert_eq!(a.matches('-').count(), 4);

        assert_ne!(a, point_id("proj", "src/a.rs", "sig", 1));
        assert_ne!(a, point_id("proj", "src/b.rs", "sig", 0));
        assert_ne!(a, point_id("proj", "src/a.rs", "other", 0));
        assert_ne!(a, point_id("other", "src/a.rs", "sig", 0));
    }

    #[test]
    fn project_id_is_stable_per_root() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        let a = compute_project_id(one.path()).unwrap();
        assert_eq!(a, compute_project_id(one.path()).unwrap());
        assert_ne!(a, compute_project_id(two.path()).unwrap());
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn workspace_branch_without_git() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(dir.path());
        resolver.set_branch_context(Some(BranchContext {
            branch: "main".into(),
            commit: "abc".into(),
        }));
        assert_eq!(resolver.current_branch(), WORKSPACE_BRANCH);
    }
}
