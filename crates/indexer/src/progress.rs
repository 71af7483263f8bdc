use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Answer of a progress sink after each file completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressControl {
    Continue,
    Cancel,
}

/// Receives one report per completed file, in completion order.
pub trait ProgressSink: Send + Sync {
    fn report(&self, current: usize, total: usize, path: &str, info: &str) -> ProgressControl;
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize, &str, &str) -> ProgressControl + Send + Sync,
{
    fn report(&self, current: usize, total: usize, path: &str, info: &str) -> ProgressControl {
        self(current, total, path, info)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _: usize, _: usize, _: &str, _: &str) -> ProgressControl {
        ProgressControl::Continue
    }
}

/// Cooperative cancellation shared between a run and whoever may stop it.
///
/// Only checked between file dispatches and between file completions; a file
/// that already started is always finished.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Returns `true` for the call that actually flipped it.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Re-arms the flag before a new run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}
