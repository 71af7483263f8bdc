//! Branch switches in a real git repository. Skipped when `git` is missing.

mod common;

use common::{commit_all, git, git_available, init_repo, open, python_source, write};
use gitvec_indexer::{detached_branch_name, NoProgress};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use tempfile::TempDir;

macro_rules! require_git {
    () => {
        if !git_available() {
            eprintln!("git not found; skipping");
            return;
        }
    };
}

#[tokio::test]
async fn test_branch_switch_reuses_stored_content() {
    require_git!();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    init_repo(root);
    write(root, "a.py", &python_source("a", 3));
    write(root, "b.py", &python_source("b", 3));
    commit_all(root, "initial");

    let h = open(root).await;
    assert!(h.engine.is_git_aware());
    let first = h.engine.index(&NoProgress).await.unwrap();
    assert_eq!(first.branch, "main");
    assert_eq!(first.totals().files_processed, 2);
    let main_a = h.visible_signatures("a.py", "main").await;
    let main_b = h.visible_signatures("b.py", "main").await;

    // feature: a.py deleted, b.py modified
    git(root, &["checkout", "-q", "-b", "feature"]);
    git(root, &["rm", "-q", "a.py"]);
    write(root, "b.py", &python_source("feature_b", 4));
    commit_all(root, "feature work");

    let on_feature = h.engine.index(&NoProgress).await.unwrap();
    let switch = on_feature.branch_switch.clone().unwrap();
    assert_eq!(switch.branch, "feature");
    assert_eq!(switch.removed_files, 1);
    assert_eq!(switch.stats.files_processed, 1);
    assert!(on_feature.reconcile.unwrap().report.is_empty());

    assert!(h.visible_signatures("a.py", "feature").await.is_empty());
    assert_eq!(h.visible_signatures("a.py", "main").await, main_a);
    let feature_b = h.visible_signatures("b.py", "feature").await;
    assert_eq!(feature_b.len(), 1);
    assert_ne!(feature_b, main_b);
    let embedded = h.embedder.texts_embedded();

    // back on main nothing needs embedding
    git(root, &["checkout", "-q", "main"]);
    let on_main = h.engine.index(&NoProgress).await.unwrap();
    let switch = on_main.branch_switch.clone().unwrap();
    assert_eq!(switch.branch, "main");
    assert_eq!(switch.reused_files, 2);
    assert_eq!(switch.stats.files_processed, 0);
    assert!(on_main.reconcile.unwrap().report.is_empty());
    assert_eq!(h.embedder.texts_embedded(), embedded);

    assert_eq!(h.visible_signatures("a.py", "main").await, main_a);
    assert_eq!(h.visible_signatures("b.py", "main").await, main_b);
    assert_eq!(h.visible_signatures("b.py", "feature").await, feature_b);
}

#[tokio::test]
async fn test_identical_content_on_two_paths_is_stored_per_path() {
    require_git!();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    init_repo(root);
    let body = python_source("shared", 2);
    write(root, "one.py", &body);
    write(root, "two.py", &body);
    commit_all(root, "twins");

    let h = open(root).await;
    h.engine.index(&NoProgress).await.unwrap();

    let one = h.points("one.py").await;
    let two = h.points("two.py").await;
    assert_eq!(
        one[0].payload.content_signature,
        two[0].payload.content_signature
    );
    let ids: BTreeSet<String> = one.iter().chain(&two).map(|p| p.id.clone()).collect();
    assert_eq!(ids.len(), one.len() + two.len());
}

#[tokio::test]
async fn test_uncommitted_edit_is_indexed_on_current_branch() {
    require_git!();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    init_repo(root);
    write(root, "a.py", &python_source("a", 2));
    commit_all(root, "initial");

    let h = open(root).await;
    h.engine.index(&NoProgress).await.unwrap();
    let before = h.visible_signatures("a.py", "main").await;

    write(root, "a.py", &python_source("edited", 3));
    let cycle = h
        .engine
        .index_paths(&["a.py".to_string()], &NoProgress)
        .await
        .unwrap();
    assert!(cycle.branch_switch.is_none());
    assert_eq!(cycle.changes.stats.files_processed, 1);

    let after = h.visible_signatures("a.py", "main").await;
    assert_eq!(after.len(), 1);
    assert_ne!(after, before);
    // the old version stays stored, hidden on main
    let versions: BTreeSet<String> = h
        .points("a.py")
        .await
        .into_iter()
        .map(|p| p.payload.content_signature)
        .collect();
    assert_eq!(versions.len(), 2);
}

#[tokio::test]
async fn test_deleted_file_is_hidden_not_removed() {
    require_git!();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    init_repo(root);
    write(root, "a.py", &python_source("a", 2));
    write(root, "b.py", &python_source("b", 2));
    commit_all(root, "initial");

    let h = open(root).await;
    h.engine.index(&NoProgress).await.unwrap();
    let stored = h.points("b.py").await.len();

    std::fs::remove_file(root.join("b.py")).unwrap();
    let outcome = h.engine.reconcile(&NoProgress).await.unwrap();
    assert_eq!(outcome.report.stale, BTreeSet::from(["b.py".to_string()]));
    assert_eq!(outcome.changes.points_hidden, stored);
    assert_eq!(outcome.changes.points_deleted, 0);
    assert_eq!(h.points("b.py").await.len(), stored);
    assert!(h.visible_signatures("b.py", "main").await.is_empty());
}

#[tokio::test]
async fn test_detached_head_gets_its_own_branch_name() {
    require_git!();
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    init_repo(root);
    write(root, "a.py", &python_source("a", 2));
    commit_all(root, "initial");
    git(root, &["checkout", "-q", "--detach"]);

    let h = open(root).await;
    let context = h.engine.git().branch_context().await.unwrap();
    assert_eq!(context.branch, detached_branch_name(&context.commit));
    assert!(context.branch.starts_with("detached-"));
    assert_eq!(h.engine.current_branch().await, context.branch);
}
