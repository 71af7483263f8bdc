use crate::config::ScanConfig;
use crate::{IndexerError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Enumerates indexable files under a project root.
///
/// Paths are returned project-relative with `/` separators, sorted.
#[derive(Debug, Clone)]
pub struct FileScanner {
    root: PathBuf,
    extensions: HashSet<String>,
    exclude_dirs: HashSet<String>,
    exclude_globs: GlobSet,
    max_file_size: u64,
    respect_gitignore: bool,
    /// Root `.gitignore`, for single-path checks
    gitignore: Option<Gitignore>,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>, config: &ScanConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude_patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                IndexerError::InvalidConfig(format!("bad exclude pattern {pattern:?}: {e}"))
            })?;
            builder.add(glob);
        }
        let exclude_globs = builder
            .build()
            .map_err(|e| IndexerError::InvalidConfig(format!("exclude patterns: {e}")))?;

        let root = root.as_ref().to_path_buf();
        let gitignore = if config.respect_gitignore && root.join(".gitignore").is_file() {
            let mut builder = GitignoreBuilder::new(&root);
            if let Some(err) = builder.add(root.join(".gitignore")) {
                log::debug!("Partially parsed .gitignore: {err}");
            }
            builder.build().ok()
        } else {
            None
        };

        Ok(Self {
            root,
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_dirs: config.exclude_dirs.iter().cloned().collect(),
            exclude_globs,
            max_file_size: config.max_file_size,
            respect_gitignore: config.respect_gitignore,
            gitignore,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn find_files(&self) -> Vec<String> {
        let exclude_dirs = self.exclude_dirs.clone();
        let walker = WalkBuilder::new(&self.root)
            .standard_filters(true)
            .hidden(false)
            .git_ignore(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .git_global(self.respect_gitignore)
            .ignore(self.respect_gitignore)
            .require_git(false)
            .filter_entry(move |entry| {
                let is_dir = entry.depth() > 0 && entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir && exclude_dirs.contains(entry.file_name().to_string_lossy().as_ref()))
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::debug!("Skipping unreadable entry: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let relative = normalize_path(&self.root, entry.path());
            if !self.is_indexable(&relative) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            // empty files produce no chunks
            if meta.len() == 0 || meta.len() > self.max_file_size {
                continue;
            }
            files.push(relative);
        }

        files.sort();
        log::debug!("Scanner found {} files under {}", files.len(), self.root.display());
        files
    }

    /// Path-only admission check (extension, excluded dirs, globs), shared
    /// with watch mode which sees paths of files that may no longer exist.
    #[must_use]
    pub fn is_indexable(&self, relative: &str) -> bool {
        let mut parts: Vec<&str> = relative.split('/').collect();
        let Some(file_name) = parts.pop() else {
            return false;
        };
        if parts.iter().any(|dir| self.exclude_dirs.contains(*dir)) {
            return false;
        }
        if self.exclude_globs.is_match(relative) {
            return false;
        }
        if self.extensions.is_empty() {
            return true;
        }
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }
}

impl FileScanner {
    /// [`is_indexable`](Self::is_indexable) plus the root `.gitignore`.
    #[must_use]
    pub fn admits(&self, relative: &str) -> bool {
        if !self.is_indexable(relative) {
            return false;
        }
        self.gitignore.as_ref().map_or(true, |gi| {
            !gi.matched_path_or_any_parents(relative, false).is_ignore()
        })
    }
}

/// Project-relative, `/`-separated form of `path`.
#[must_use]
pub fn normalize_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn finds_sources_and_skips_excluded() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "src/main.rs", "fn main() {}\n");
        write(root, "src/lib.py", "x = 1\n");
        write(root, "target/debug/out.rs", "generated\n");
        write(root, "node_modules/pkg/index.js", "module.exports = 1\n");
        write(root, "assets/logo.png", "binary");
        write(root, "web/app.min.js", "minified");
        write(root, "empty.rs", "");
        write(root, ".gitvec/state.json", "{}");

        let scanner = FileScanner::new(root, &ScanConfig::default()).unwrap();
        assert_eq!(
            scanner.find_files(),
            vec!["src/lib.py".to_string(), "src/main.rs".to_string()]
        );
    }

    #[test]
    fn honors_gitignore_without_a_repository() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, ".gitignore", "generated/\n");
        write(root, "generated/api.rs", "pub fn x() {}\n");
        write(root, "keep.rs", "pub fn y() {}\n");

        let scanner = FileScanner::new(root, &ScanConfig::default()).unwrap();
        assert_eq!(scanner.find_files(), vec!["keep.rs".to_string()]);
    }

    #[test]
    fn admits_applies_root_gitignore() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, ".gitignore", "generated/\n*.gen.rs\n");

        let scanner = FileScanner::new(root, &ScanConfig::default()).unwrap();
        assert!(scanner.admits("src/lib.rs"));
        assert!(!scanner.admits("generated/api.rs"));
        assert!(!scanner.admits("src/model.gen.rs"));
        assert!(!scanner.admits("target/x.rs"));
    }

    #[test]
    fn size_limit_applies() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "big.rs", &"x".repeat(200));
        write(root, "small.rs", "x");

        let config = ScanConfig {
            max_file_size: 100,
            ..ScanConfig::default()
        };
        let scanner = FileScanner::new(root, &config).unwrap();
        assert_eq!(scanner.find_files(), vec!["small.rs".to_string()]);
    }

    #[test]
    fn indexable_checks_paths_only() {
        let scanner = FileScanner::new("/p", &ScanConfig::default()).unwrap();
        assert!(scanner.is_indexable("src/gone.rs"));
        assert!(!scanner.is_indexable("target/gone.rs"));
        assert!(!scanner.is_indexable("src/image.png"));
        assert!(!scanner.is_indexable("Cargo.lock"));
    }

    #[test]
    fn bad_glob_is_config_error() {
        let config = ScanConfig {
            exclude_patterns: vec!["[".to_string()],
            ..ScanConfig::default()
        };
        assert!(matches!(
            FileScanner::new("/p", &config),
            Err(IndexerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn normalize_strips_root() {
        assert_eq!(
            normalize_path(Path::new("/a/b"), Path::new("/a/b/src/x.rs")),
            "src/x.rs"
        );
    }
}
