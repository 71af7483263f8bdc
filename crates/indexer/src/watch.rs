//! Watch mode: filesystem events are debounced into batches of changed
//! paths, and each batch runs as one [`IndexingEngine::index_paths`] cycle.
//!
//! The paths of a cycle are written to the watch session file before it
//! starts and cleared once it finished, so a session that died mid-cycle is
//! picked up again by the next [`WatchSession::start`].

use crate::engine::{watch_session_path, IndexReport, IndexingEngine};
use crate::processor::ProcessStats;
use crate::progress::NoProgress;
use crate::scanner::normalize_path;
use crate::session::WatchSessionMetadata;
use crate::{IndexerError, Result};
use log::{error, info, warn};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{broadcast, mpsc, watch, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio::time;

const FS_EVENT_REASON: &str = "fs_event";
const RECOVERY_REASON: &str = "recovery";
const RESUME_REASON: &str = "resume";

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub debounce: Duration,
    pub max_batch_wait: Duration,
    pub notify_poll_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::from(&crate::config::WatchConfig::default())
    }
}

impl From<&crate::config::WatchConfig> for WatchOptions {
    fn from(config: &crate::config::WatchConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            max_batch_wait: Duration::from_millis(config.max_batch_wait_ms),
            notify_poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// Broadcast after every cycle
#[derive(Debug, Clone)]
pub struct IndexUpdate {
    pub completed_at: SystemTime,
    pub duration_ms: u64,
    pub reason: String,
    pub success: bool,
    /// Paths the cycle was asked to index; empty for a full pass
    pub paths: Vec<String>,
    pub branch: Option<String>,
    pub stats: Option<ProcessStats>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchHealth {
    pub last_success: Option<SystemTime>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_duration_ms: Option<u64>,
    pub pending_paths: usize,
    pub indexing: bool,
}

impl WatchHealth {
    const fn initial() -> Self {
        Self {
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            last_duration_ms: None,
            pending_paths: 0,
            indexing: false,
        }
    }
}

enum WatchCommand {
    Trigger { reason: String },
    Shutdown,
}

/// A running watch loop over one engine.
pub struct WatchSession {
    engine: Arc<IndexingEngine>,
    command_tx: mpsc::Sender<WatchCommand>,
    update_tx: broadcast::Sender<IndexUpdate>,
    health_rx: watch::Receiver<WatchHealth>,
    task: TokioMutex<Option<JoinHandle<()>>>,
    _watcher: RecommendedWatcher,
}

impl WatchSession {
    /// Starts watching `engine.root()`. Paths left over by an interrupted
    /// session, or an interrupted indexing run, are picked up by an immediate
    /// first cycle.
    pub async fn start(engine: Arc<IndexingEngine>, options: WatchOptions) -> Result<Self> {
        let session_path = watch_session_path(engine.root());
        let mut session = WatchSessionMetadata::load(&session_path).await?;
        session.begin_session();
        session.save(&session_path).await?;

        let mut state = DebounceState::new(options.debounce, options.max_batch_wait);
        let recovery = session.pending_recovery();
        if !recovery.is_empty() {
            info!(
                "Recovering {} paths from an interrupted watch cycle",
                recovery.len()
            );
            for path in recovery {
                state.record_path(path);
            }
            state.force_run(RECOVERY_REASON.to_string());
        } else if engine.can_resume().await {
            info!("Resuming an interrupted indexing run");
            state.force_run(RESUME_REASON.to_string());
        }

        let (event_tx, event_rx) = mpsc::channel(1024);
        let (command_tx, command_rx) = mpsc::channel(16);
        let (health_tx, health_rx) = watch::channel(WatchHealth::initial());
        let (update_tx, _) = broadcast::channel(32);

        let watch_root = tokio::fs::canonicalize(engine.root()).await?;
        let watcher = create_fs_watcher(&watch_root, event_tx, options.notify_poll_interval)?;

        let task = tokio::spawn(index_loop(
            Arc::clone(&engine),
            watch_root,
            session,
            session_path,
            state,
            event_rx,
            command_rx,
            update_tx.clone(),
            health_tx,
        ));

        info!("Watching {}", engine.root().display());
        Ok(Self {
            engine,
            command_tx,
            update_tx,
            health_rx,
            task: TokioMutex::new(Some(task)),
            _watcher: watcher,
        })
    }

    /// Runs a full incremental pass ([`IndexingEngine::index`]) as soon as
    /// the loop is idle.
    pub async fn trigger(&self, reason: impl Into<String>) -> Result<()> {
        self.command_tx
            .send(WatchCommand::Trigger {
                reason: reason.into(),
            })
            .await
            .map_err(|e| IndexerError::WatchError(format!("failed to send trigger: {e}")))
    }

    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<IndexUpdate> {
        self.update_tx.subscribe()
    }

    #[must_use]
    pub fn health_snapshot(&self) -> WatchHealth {
        self.health_rx.borrow().clone()
    }

    /// Cancels the in-flight cycle and waits for the loop to exit.
    pub async fn shutdown(&self) -> Result<()> {
        self.engine.request_cancellation();
        // The loop may already be gone; joining below covers both cases.
        let _ = self.command_tx.send(WatchCommand::Shutdown).await;
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.await
                .map_err(|e| IndexerError::WatchError(format!("watch loop panicked: {e}")))?;
        }
        info!("Stopped watching {}", self.engine.root().display());
        Ok(())
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        let _ = self.command_tx.try_send(WatchCommand::Shutdown);
    }
}

fn create_fs_watcher(
    root: &Path,
    sender: mpsc::Sender<notify::Result<Event>>,
    poll_interval: Duration,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = sender.blocking_send(res);
        },
        NotifyConfig::default().with_poll_interval(poll_interval),
    )
    .map_err(|e| IndexerError::WatchError(format!("watcher init failed: {e}")))?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| IndexerError::WatchError(format!("failed to watch {}: {e}", root.display())))?;
    Ok(watcher)
}

#[allow(clippy::too_many_arguments)]
async fn index_loop(
    engine: Arc<IndexingEngine>,
    watch_root: PathBuf,
    mut session: WatchSessionMetadata,
    session_path: PathBuf,
    mut state: DebounceState,
    mut event_rx: mpsc::Receiver<notify::Result<Event>>,
    mut command_rx: mpsc::Receiver<WatchCommand>,
    update_tx: broadcast::Sender<IndexUpdate>,
    health_tx: watch::Sender<WatchHealth>,
) {
    let mut health = WatchHealth::initial();

    loop {
        let next_deadline = state.next_deadline();

        tokio::select! {
            Some(event) = event_rx.recv() => {
                if handle_event(&engine, &watch_root, event, &mut state) {
                    health.pending_paths = state.pending();
                    let _ = health_tx.send(health.clone());
                }
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(WatchCommand::Trigger { reason }) => {
                        state.request_full_pass();
                        state.force_run(reason);
                        health.pending_paths = state.pending();
                        let _ = health_tx.send(health.clone());
                    }
                    Some(WatchCommand::Shutdown) | None => break,
                }
            }
            () = async {
                if let Some(deadline) = next_deadline {
                    time::sleep_until(deadline).await;
                }
            }, if state.should_run() && next_deadline.is_some() => {
                let batch = state.take_batch();
                health.indexing = true;
                let _ = health_tx.send(health.clone());

                session.begin_cycle(batch.paths.iter().cloned());
                if let Err(err) = session.save(&session_path).await {
                    warn!("Failed to persist watch session: {err}");
                }

                let cycle = run_cycle(&engine, &batch).await;
                health.indexing = false;
                health.pending_paths = state.pending();
                health.last_duration_ms = Some(cycle.duration_ms);

                let update = match cycle.result {
                    Ok(summary) => {
                        if summary.stats.cancelled {
                            // Keep the in-flight set for the next session.
                            session.fail_cycle();
                        } else {
                            session.complete_cycle(
                                Some(summary.branch.clone()),
                                summary.commit.clone(),
                                summary.stats.files_processed,
                                summary.stats.chunks_created,
                            );
                        }
                        health.last_success = Some(SystemTime::now());
                        health.last_error = None;
                        health.consecutive_failures = 0;
                        info!(
                            "Watch cycle ({}) on {}: {} files, {} chunks in {}ms",
                            batch.reason,
                            summary.branch,
                            summary.stats.files_processed,
                            summary.stats.chunks_created,
                            cycle.duration_ms
                        );
                        IndexUpdate {
                            completed_at: SystemTime::now(),
                            duration_ms: cycle.duration_ms,
                            reason: batch.reason,
                            success: true,
                            paths: batch.paths.into_iter().collect(),
                            branch: Some(summary.branch),
                            stats: Some(summary.stats),
                            error: None,
                        }
                    }
                    Err(err) => {
                        error!("Watch cycle ({}) failed: {err}", batch.reason);
                        session.fail_cycle();
                        health.last_error = Some(err.to_string());
                        health.consecutive_failures += 1;
                        IndexUpdate {
                            completed_at: SystemTime::now(),
                            duration_ms: cycle.duration_ms,
                            reason: batch.reason,
                            success: false,
                            paths: batch.paths.into_iter().collect(),
                            branch: None,
                            stats: None,
                            error: Some(err.to_string()),
                        }
                    }
                };

                if let Err(err) = session.save(&session_path).await {
                    warn!("Failed to persist watch session: {err}");
                }
                let _ = health_tx.send(health.clone());
                let _ = update_tx.send(update);
            }
        }
    }
}

struct CycleSummary {
    branch: String,
    commit: Option<String>,
    stats: ProcessStats,
}

struct CycleResult {
    duration_ms: u64,
    result: Result<CycleSummary>,
}

async fn run_cycle(engine: &IndexingEngine, batch: &Batch) -> CycleResult {
    let started = Instant::now();
    let result = if batch.full_pass {
        engine.index(&NoProgress).await.map(|report| summarize(&report))
    } else {
        let paths: Vec<String> = batch.paths.iter().cloned().collect();
        engine
            .index_paths(&paths, &NoProgress)
            .await
            .map(|cycle| CycleSummary {
                stats: cycle.totals(),
                branch: cycle.branch,
                commit: cycle.commit,
            })
    };
    #[allow(clippy::cast_possible_truncation)]
    let duration_ms = started.elapsed().as_millis() as u64;
    CycleResult {
        duration_ms,
        result,
    }
}

fn summarize(report: &IndexReport) -> CycleSummary {
    CycleSummary {
        branch: report.branch.clone(),
        commit: report.commit.clone(),
        stats: report.totals(),
    }
}

/// `root` is the canonical form of the engine root, as notify reports it.
fn handle_event(
    engine: &IndexingEngine,
    root: &Path,
    event: notify::Result<Event>,
    state: &mut DebounceState,
) -> bool {
    match event {
        Ok(evt) => {
            let mut relevant = 0;
            for path in evt.paths {
                if !is_relevant_path(root, &path) {
                    continue;
                }
                let relative = normalize_path(root, &path);
                if engine.scanner().admits(&relative) && state.record_path(relative) {
                    relevant += 1;
                }
            }
            if relevant > 0 {
                state.record_event(FS_EVENT_REASON);
                return true;
            }
            false
        }
        Err(err) => {
            warn!("Watcher error: {err}");
            false
        }
    }
}

fn is_relevant_path(root: &Path, path: &Path) -> bool {
    const IGNORED: &[&str] = &[".git", ".hg", ".svn", crate::config::STATE_DIR];
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative.components().next().is_some_and(|first| {
        let first = first.as_os_str().to_string_lossy();
        !IGNORED.iter().any(|ignored| first == *ignored)
    })
}

struct Batch {
    reason: String,
    paths: BTreeSet<String>,
    full_pass: bool,
}

/// Collects changed paths until the debounce window closes or the batch
/// has waited `max_batch` since its first event.
struct DebounceState {
    debounce: Duration,
    max_batch: Duration,
    dirty: bool,
    paths: BTreeSet<String>,
    last_event: Option<Instant>,
    first_event: Option<Instant>,
    reason: Option<String>,
    force_immediate: bool,
    full_pass: bool,
}

impl DebounceState {
    const fn new(debounce: Duration, max_batch: Duration) -> Self {
        Self {
            debounce,
            max_batch,
            dirty: false,
            paths: BTreeSet::new(),
            last_event: None,
            first_event: None,
            reason: None,
            force_immediate: false,
            full_pass: false,
        }
    }

    /// Returns false when the path is already queued.
    fn record_path(&mut self, path: String) -> bool {
        self.paths.insert(path)
    }

    fn record_event(&mut self, reason: &str) {
        if self.reason.is_none() {
            self.reason = Some(reason.to_string());
        }
        self.last_event = Some(Instant::now());
        self.first_event.get_or_insert_with(Instant::now);
        self.dirty = true;
    }

    fn force_run(&mut self, reason: String) {
        self.reason = Some(reason);
        self.force_immediate = true;
        self.dirty = true;
    }

    const fn request_full_pass(&mut self) {
        self.full_pass = true;
    }

    fn pending(&self) -> usize {
        self.paths.len()
    }

    const fn should_run(&self) -> bool {
        self.dirty
    }

    fn next_deadline(&self) -> Option<time::Instant> {
        if !self.dirty {
            return None;
        }

        if self.force_immediate {
            return Some(time::Instant::now());
        }

        let mut deadline = None;

        if let Some(last) = self.last_event {
            deadline = Some(last + self.debounce);
        }

        if let Some(first) = self.first_event {
            let forced = first + self.max_batch;
            deadline = Some(match deadline {
                Some(current) if forced < current => forced,
                Some(current) => current,
                None => forced,
            });
        }

        deadline.map(time::Instant::from_std)
    }

    /// Hands out the queued batch and resets the state.
    fn take_batch(&mut self) -> Batch {
        let batch = Batch {
            reason: self
                .reason
                .take()
                .unwrap_or_else(|| FS_EVENT_REASON.to_string()),
            paths: std::mem::take(&mut self.paths),
            full_pass: self.full_pass,
        };
        self.dirty = false;
        self.last_event = None;
        self.first_event = None;
        self.force_immediate = false;
        self.full_pass = false;
        batch
    }
}
