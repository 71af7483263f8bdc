use super::domain::{Hint, HintKind, ResponseMeta};
use super::CommandOutcome;
use crate::progress::BarProgress;
use anyhow::{Context, Result};
use gitvec_indexer::{
    CancellationFlag, IndexReport, IndexingEngine, ProcessStats, ReconcileReport, WatchHealth,
    WatchOptions, WatchSession,
};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Cancels the engine's current run on Ctrl-C.
fn cancel_on_ctrl_c(flag: CancellationFlag) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight files (run again to resume)");
            flag.cancel();
        }
    })
}

fn meta_for(engine: &IndexingEngine, branch: &str) -> ResponseMeta {
    ResponseMeta {
        collection: Some(engine.collection().to_string()),
        branch: Some(branch.to_string()),
        ..ResponseMeta::default()
    }
}

fn stats_hints(stats: &ProcessStats) -> Vec<Hint> {
    let mut hints = Vec::new();
    if stats.cancelled {
        hints.push(Hint::new(
            HintKind::Action,
            "Run was interrupted; `gitvec index` resumes where it stopped",
        ));
    }
    if stats.failed_files > 0 {
        hints.push(Hint::new(
            HintKind::Warn,
            format!(
                "{} files failed to index; they are retried on the next run",
                stats.failed_files
            ),
        ));
    }
    hints
}

fn describe_stats(stats: &ProcessStats) -> String {
    format!(
        "{} files indexed ({} chunks), {} skipped, {} failed{}",
        stats.files_processed,
        stats.chunks_created,
        stats.skipped_files,
        stats.failed_files,
        if stats.cancelled { " [interrupted]" } else { "" }
    )
}

fn describe_report(report: &ReconcileReport) -> String {
    format!(
        "{} missing, {} stale, {} outdated, {} unhidden, {} superseded",
        report.missing.len(),
        report.stale.len(),
        report.outdated.len(),
        report.to_unhide.len(),
        report.superseded.len()
    )
}

fn describe_index(report: &IndexReport) -> String {
    let mut lines = vec![format!("Branch {}", report.branch)];
    if let Some(resumed) = &report.resumed {
        lines.push(format!("  resumed: {}", describe_stats(&resumed.stats)));
    }
    if let Some(switch) = &report.branch_switch {
        lines.push(format!(
            "  branch switch: {} reused, {} removed, {}",
            switch.reused_files,
            switch.removed_files,
            describe_stats(&switch.stats)
        ));
    }
    if let Some(full) = &report.full {
        lines.push(format!("  full: {}", describe_stats(full)));
    }
    if let Some(reconcile) = &report.reconcile {
        lines.push(format!("  reconcile: {}", describe_report(&reconcile.report)));
    }
    lines.push(format!("Total: {}", describe_stats(&report.totals())));
    lines.join("\n")
}

pub async fn index(
    engine: &IndexingEngine,
    force_full: bool,
    show_progress: bool,
) -> Result<CommandOutcome> {
    let listener = cancel_on_ctrl_c(engine.cancellation_flag());
    let bar = BarProgress::new(show_progress);
    let result = if force_full {
        engine.force_full(&bar).await
    } else {
        engine.index(&bar).await
    };
    bar.finish();
    listener.abort();

    let report = result.context("indexing failed")?;
    Ok(CommandOutcome {
        data: serde_json::to_value(&report)?,
        summary: describe_index(&report),
        hints: stats_hints(&report.totals()),
        meta: meta_for(engine, &report.branch),
    })
}

pub async fn reconcile(engine: &IndexingEngine, show_progress: bool) -> Result<CommandOutcome> {
    let listener = cancel_on_ctrl_c(engine.cancellation_flag());
    let bar = BarProgress::new(show_progress);
    let result = engine.reconcile(&bar).await;
    bar.finish();
    listener.abort();

    let outcome = result.context("reconcile failed")?;
    let branch = outcome.changes.branch.clone();
    Ok(CommandOutcome {
        data: serde_json::to_value(&outcome)?,
        summary: format!(
            "Reconciled {branch}: {}\n{}",
            describe_report(&outcome.report),
            describe_stats(outcome.stats())
        ),
        hints: stats_hints(outcome.stats()),
        meta: meta_for(engine, &branch),
    })
}

pub async fn status(engine: &IndexingEngine) -> Result<CommandOutcome> {
    let status = engine.status().await?;
    let mut hints = Vec::new();
    if status.metadata.can_resume {
        hints.push(Hint::new(
            HintKind::Action,
            "An interrupted run can be resumed with `gitvec index`",
        ));
    }
    if status.points == 0 {
        hints.push(Hint::new(HintKind::Info, "Nothing indexed yet"));
    }
    if !status.git_available {
        hints.push(Hint::new(
            HintKind::Info,
            "Not a git work tree; content hashes are used and deletions are permanent",
        ));
    }

    let summary = [
        format!("Root:        {}", status.root),
        format!("Project:     {}", status.project_id),
        format!("Collection:  {} ({})", status.collection, status.store_backend),
        format!(
            "Branch:      {}{}",
            status.branch,
            status
                .commit
                .as_deref()
                .map(|c| format!(" @ {}", &c[..c.len().min(12)]))
                .unwrap_or_default()
        ),
        format!("Signatures:  {}", status.signature_strategy),
        format!(
            "Indexed:     {} files, {} points ({} visible)",
            status.indexed_files, status.points, status.visible_points
        ),
        format!(
            "Last run:    {:?}, {}/{} files, {} failed",
            status.metadata.status,
            status.metadata.files_completed,
            status.metadata.files_to_index,
            status.metadata.failed_files
        ),
    ]
    .join("\n");

    Ok(CommandOutcome {
        meta: meta_for(engine, &status.branch),
        data: serde_json::to_value(&status)?,
        summary,
        hints,
    })
}

pub async fn clear(engine: &IndexingEngine) -> Result<CommandOutcome> {
    engine.clear().await?;
    let branch = engine.current_branch().await;
    Ok(CommandOutcome {
        data: serde_json::json!({ "cleared": engine.collection() }),
        summary: format!("Cleared {}", engine.collection()),
        hints: Vec::new(),
        meta: meta_for(engine, &branch),
    })
}

fn health_hints(health: &WatchHealth) -> Vec<Hint> {
    let mut hints = Vec::new();
    if health.consecutive_failures > 0 {
        let cause = health.last_error.as_deref().unwrap_or("unknown error");
        hints.push(Hint::new(
            HintKind::Warn,
            format!(
                "Last {} watch cycles failed ({cause}); `gitvec index` retries them",
                health.consecutive_failures
            ),
        ));
    }
    if health.pending_paths > 0 {
        hints.push(Hint::new(
            HintKind::Info,
            format!(
                "{} changed paths were not indexed before stopping",
                health.pending_paths
            ),
        ));
    }
    hints
}

/// Watches until Ctrl-C.
pub async fn watch(engine: IndexingEngine) -> Result<CommandOutcome> {
    let engine = Arc::new(engine);
    let options = WatchOptions::from(&engine.config().watch);
    let session = WatchSession::start(Arc::clone(&engine), options)
        .await
        .context("failed to start watching")?;
    let mut updates = session.subscribe_updates();
    let mut totals = ProcessStats::default();
    let mut cycles = 0usize;

    info!("Watching {} (Ctrl-C to stop)", engine.root().display());
    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            update = updates.recv() => match update {
                Ok(update) => {
                    cycles += 1;
                    match (&update.stats, &update.error) {
                        (Some(stats), _) => {
                            info!("[{}] {}", update.reason, describe_stats(stats));
                            totals.merge(stats);
                        }
                        (None, Some(err)) => warn!("[{}] cycle failed: {err}", update.reason),
                        (None, None) => {}
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Missed {missed} watch updates"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    let health = session.health_snapshot();
    session.shutdown().await?;

    let branch = engine.current_branch().await;
    Ok(CommandOutcome {
        data: serde_json::json!({ "cycles": cycles, "totals": totals, "health": health }),
        summary: format!("Stopped after {cycles} cycles: {}", describe_stats(&totals)),
        hints: health_hints(&health),
        meta: meta_for(&engine, &branch),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn interrupted_runs_get_resume_hint() {
        let stats = ProcessStats {
            files_processed: 3,
            cancelled: true,
            failed_files: 1,
            ..ProcessStats::default()
        };
        let hints = stats_hints(&stats);
        assert_eq!(hints.len(), 2);
        assert_eq!(hints[0].kind, HintKind::Action);
        assert_eq!(hints[1].kind, HintKind::Warn);
        assert!(describe_stats(&stats).ends_with("[interrupted]"));
    }

    #[test]
    fn clean_runs_have_no_hints() {
        assert!(stats_hints(&ProcessStats::default()).is_empty());
    }

    #[test]
    fn failing_watch_cycles_get_warning() {
        let mut health = WatchHealth {
            last_success: None,
            last_error: Some("store unavailable".to_string()),
            consecutive_failures: 2,
            last_duration_ms: Some(12),
            pending_paths: 0,
            indexing: false,
        };
        let hints = health_hints(&health);
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].kind, HintKind::Warn);
        assert!(hints[0].text.contains("store unavailable"));

        health.consecutive_failures = 0;
        assert!(health_hints(&health).is_empty());
    }
}
