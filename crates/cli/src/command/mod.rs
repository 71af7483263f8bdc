mod context;
pub mod domain;
mod services;

pub use context::CommandContext;
pub use domain::CommandResponse;

use anyhow::Result;
use domain::{Hint, ResponseMeta};
use serde_json::Value;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Index { force_full: bool },
    Reconcile,
    Status,
    Watch,
    Clear,
}

/// Result of one command, before it is rendered
pub struct CommandOutcome {
    pub data: Value,
    /// Human-readable report for non-JSON output
    pub summary: String,
    pub hints: Vec<Hint>,
    pub meta: ResponseMeta,
}

impl CommandOutcome {
    pub fn into_response(self) -> CommandResponse {
        CommandResponse::ok(self.data, self.meta, self.hints)
    }
}

pub async fn execute(
    ctx: &CommandContext,
    action: CommandAction,
    show_progress: bool,
) -> Result<CommandOutcome> {
    let started = Instant::now();
    let engine = ctx.open_engine().await?;

    let mut outcome = match action {
        CommandAction::Index { force_full } => {
            services::index(&engine, force_full, show_progress).await?
        }
        CommandAction::Reconcile => services::reconcile(&engine, show_progress).await?,
        CommandAction::Status => services::status(&engine).await?,
        CommandAction::Watch => services::watch(engine).await?,
        CommandAction::Clear => services::clear(&engine).await?,
    };

    outcome.meta.config_path = ctx.config_path_display();
    #[allow(clippy::cast_possible_truncation)]
    let elapsed = started.elapsed().as_millis() as u64;
    outcome.meta.duration_ms = Some(elapsed);
    Ok(outcome)
}
