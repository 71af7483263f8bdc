//! Git topology: availability, branch/commit, diffs and blob hashes.
//!
//! Every query shells out to the `git` binary. A failing subprocess never
//! surfaces as an error: it flips availability off for the rest of the
//! session and the caller falls back to filesystem-based detection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Commit placeholder for a repository without any commit yet
pub const UNBORN_COMMIT: &str = "unborn";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchContext {
    pub branch: String,
    pub commit: String,
}

/// Paths changed between two refs, project-relative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchDiff {
    pub changed: BTreeSet<String>,
    pub added: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl BranchDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.deleted.is_empty()
    }

    /// Union of all touched paths
    #[must_use]
    pub fn paths(&self) -> BTreeSet<String> {
        self.changed
            .iter()
            .chain(&self.added)
            .chain(&self.deleted)
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
pub struct GitTopology {
    root: PathBuf,
    available: AtomicBool,
}

impl GitTopology {
    /// Checks once whether `root` lives inside a git work tree.
    pub async fn probe(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let inside = Command::new("git")
            .arg("-C")
            .arg(&root)
            .args(["rev-parse", "--is-inside-work-tree"])
            .stdin(Stdio::null())
            .output()
            .await
            .ok()
            .filter(|out| out.status.success())
            .is_some_and(|out| String::from_utf8_lossy(&out.stdout).trim() == "true");

        if inside {
            log::info!("Git work tree detected at {}", root.display());
        } else {
            log::info!(
                "No git work tree at {}; using content hashes",
                root.display()
            );
        }
        Self {
            root,
            available: AtomicBool::new(inside),
        }
    }

    /// Topology that never spawns git.
    #[must_use]
    pub fn disabled(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            available: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn is_git_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn degrade(&self, reason: &str) {
        if self.available.swap(false, Ordering::AcqRel) {
            log::warn!("Git disabled for the rest of this session: {reason}");
        }
    }

    async fn output(&self, args: &[&str], stdin: Option<&[u8]>) -> Option<Vec<u8>> {
        if !self.is_git_available() {
            return None;
        }
        let mut command = Command::new("git");
        command
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.degrade(&format!("failed to spawn git: {err}"));
                return None;
            }
        };
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            if let Err(err) = pipe.write_all(input).await {
                self.degrade(&format!("git {}: {err}", args.join(" ")));
                return None;
            }
        }
        let out = match child.wait_with_output().await {
            Ok(out) => out,
            Err(err) => {
                self.degrade(&format!("git {}: {err}", args.join(" ")));
                return None;
            }
        };
        if !out.status.success() {
            self.degrade(&format!(
                "git {} exited with {}: {}",
                args.join(" "),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ));
            return None;
        }
        Some(out.stdout)
    }

    async fn run(&self, args: &[&str]) -> Option<String> {
        self.output(args, None)
            .await
            .map(|out| String::from_utf8_lossy(&out).trim().to_string())
    }

    /// `HEAD` commit, or [`UNBORN_COMMIT`] before the first commit.
    pub async fn current_commit(&self) -> Option<String> {
        if !self.is_git_available() {
            return None;
        }
        // an unborn HEAD is a normal state, not a git failure
        let out = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["rev-parse", "--verify", "--quiet", "HEAD"])
            .stdin(Stdio::null())
            .output()
            .await;
        match out {
            Ok(out) if out.status.success() => {
                Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
            }
            Ok(_) => Some(UNBORN_COMMIT.to_string()),
            Err(err) => {
                self.degrade(&format!("failed to spawn git: {err}"));
                None
            }
        }
    }

    /// Checked-out branch; `detached-<short commit>` on a detached HEAD.
    pub async fn current_branch(&self) -> Option<String> {
        let branch = self.run(&["branch", "--show-current"]).await?;
        if !branch.is_empty() {
            return Some(branch);
        }
        let commit = self.current_commit().await?;
        Some(detached_branch_name(&commit))
    }

    pub async fn branch_context(&self) -> Option<BranchContext> {
        let branch = self.current_branch().await?;
        let commit = self.current_commit().await?;
        Some(BranchContext { branch, commit })
    }

    /// Files that differ between two refs. Renames are reported as a
    /// deletion of the old path plus an addition of the new one.
    pub async fn diff(&self, old_ref: &str, new_ref: &str) -> Option<BranchDiff> {
        if old_ref == UNBORN_COMMIT || new_ref == UNBORN_COMMIT {
            return None;
        }
        let out = self
            .output(
                &[
                    "diff",
                    "--name-status",
                    "-z",
                    "-M",
                    "--relative",
                    old_ref,
                    new_ref,
                ],
                None,
            )
            .await?;
        Some(parse_name_status(&String::from_utf8_lossy(&out)))
    }

    /// Blob hash of the file as it is on disk.
    pub async fn blob_hash(&self, relative: &str) -> Option<String> {
        self.run(&["hash-object", "--", relative]).await
    }

    /// Blob hash of `content`, with the clean filters configured for `relative`.
    pub async fn hash_content(&self, relative: &str, content: &[u8]) -> Option<String> {
        let out = self
            .output(
                &["hash-object", "--stdin", "--path", relative],
                Some(content),
            )
            .await?;
        let hash = String::from_utf8_lossy(&out).trim().to_string();
        (!hash.is_empty()).then_some(hash)
    }
}

#[must_use]
pub fn detached_branch_name(commit: &str) -> String {
    let short: String = commit.chars().take(7).collect();
    format!("detached-{short}")
}

/// Parses `git diff --name-status -z` output.
fn parse_name_status(raw: &str) -> BranchDiff {
    let mut diff = BranchDiff::default();
    let mut fields = raw.split('\0').filter(|f| !f.is_empty());
    while let Some(status) = fields.next() {
        match status.chars().next() {
            Some('R') => {
                let (Some(old), Some(new)) = (fields.next(), fields.next()) else {
                    break;
                };
                diff.deleted.insert(old.to_string());
                diff.added.insert(new.to_string());
            }
            Some('C') => {
                let (Some(_source), Some(new)) = (fields.next(), fields.next()) else {
                    break;
                };
                diff.added.insert(new.to_string());
            }
            Some('A') => {
                if let Some(path) = fields.next() {
                    diff.added.insert(path.to_string());
                }
            }
            Some('D') => {
                if let Some(path) = fields.next() {
                    diff.deleted.insert(path.to_string());
                }
            }
            _ => {
                if let Some(path) = fields.next() {
                    diff.changed.insert(path.to_string());
                }
            }
        }
    }
    diff
}
