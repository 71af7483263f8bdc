//! # gitvec CLI
//!
//! Keeps a vector index of a source tree in step with git.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gitvec index` | Resume, follow `HEAD`, reconcile |
//! | `gitvec index --force-full` | Drop the index and embed every file |
//! | `gitvec reconcile` | Compare index and work tree and fix the difference |
//! | `gitvec status` | Show branch, collection and run progress |
//! | `gitvec watch` | Re-index changed files until Ctrl-C |
//! | `gitvec clear` | Remove everything indexed for the project |

mod command;
mod progress;

use clap::{Parser, Subcommand};
use command::{CommandAction, CommandContext, CommandResponse};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "gitvec", version, about = "Git-aware incremental vector indexing")]
struct Cli {
    /// Project root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (default: <root>/.gitvec/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print a JSON response instead of a summary
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the index up to date with the current branch.
    ///
    /// Resumes an interrupted run first, then re-aligns visibility when
    /// `HEAD` moved, then reconciles the work tree.
    Index {
        /// Clear the index and re-embed every file
        #[arg(long)]
        force_full: bool,
    },

    /// Compare the index with the work tree and apply the corrections
    Reconcile,

    /// Show index status
    Status,

    /// Watch the project and index changes as they happen
    Watch,

    /// Remove every indexed point of the project
    Clear,
}

impl From<&Commands> for CommandAction {
    fn from(command: &Commands) -> Self {
        match command {
            Commands::Index { force_full } => Self::Index {
                force_full: *force_full,
            },
            Commands::Reconcile => Self::Reconcile,
            Commands::Status => Self::Status,
            Commands::Watch => Self::Watch,
            Commands::Clear => Self::Clear,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();

    let show_progress = !cli.json && std::io::stderr().is_terminal();
    let result = async {
        let ctx = CommandContext::load(&cli.root, cli.config.as_deref())?;
        command::execute(&ctx, CommandAction::from(&cli.command), show_progress).await
    }
    .await;

    match result {
        Ok(outcome) if cli.json => print_json(&outcome.into_response()),
        Ok(outcome) => {
            println!("{}", outcome.summary);
            for hint in &outcome.hints {
                eprintln!("hint: {}", hint.text);
            }
            ExitCode::SUCCESS
        }
        Err(err) if cli.json => {
            print_json(&CommandResponse::error(format!("{err:#}")));
            ExitCode::FAILURE
        }
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_json(response: &CommandResponse) -> ExitCode {
    match serde_json::to_string_pretty(response) {
        Ok(json) => {
            println!("{json}");
            if response.is_error() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            log::error!("Failed to serialize response: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["gitvec", "index", "--force-full", "--json", "--root", "/tmp"])
            .unwrap();
        assert!(cli.json);
        assert_eq!(cli.root, PathBuf::from("/tmp"));
        assert_eq!(
            CommandAction::from(&cli.command),
            CommandAction::Index { force_full: true }
        );
    }
}
