//! `taskboard` -- command-line task board client.
//!
//! One-shot subcommands talk to the REST API; `watch` follows the task list
//! live over Action Cable. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/taskboard/config.toml`).
//!
//! ```bash
//! # Sign in once; the session is remembered
//! cargo run --bin taskboard -- sign-in --email alice@example.com --password secret
//!
//! # Follow in-progress tasks live
//! cargo run --bin taskboard -- watch --status in_progress
//!
//! # Against another server
//! TASKBOARD_API_URL=https://tasks.example.com \
//!     TASKBOARD_CABLE_URL=wss://tasks.example.com/cable cargo run -- tasks
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use taskboard::cli;
use taskboard::config::{CliArgs, ClientConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let mut cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let command = cli.command.take().unwrap_or_default();
    tracing::debug!(api = %config.api_url, cable = %config.cable_url, "taskboard starting");

    match cli::run(command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(err = ?e, "command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging.
///
/// Logs go to stderr so they never mix with command output, or to
/// `file_path` through a non-blocking writer. The returned [`WorkerGuard`]
/// must be held until shutdown so buffered file entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file = file_path.and_then(|path| Some((path.parent()?, path.file_name()?)));
    let Some((log_dir, file_name)) = file else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
