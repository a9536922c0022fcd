//! File logging for the `thor-runner` binary.
//!
//! Child output goes to the terminal; our own tracing events go to a log file
//! so they never interleave with the script's stdout.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Overrides the log file location when set.
const LOG_FILE_ENV: &str = "THOR_RUNNER_LOG";

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the file subscriber. Calling it again is a no-op.
pub fn init() -> Result<()> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let log_path = log_path(
        std::env::var(LOG_FILE_ENV).ok(),
        std::env::var("XDG_STATE_HOME").ok(),
        home::home_dir(),
    )?;
    let (directory, file_name) = split_path(&log_path)?;
    fs::create_dir_all(&directory)
        .with_context(|| format!("Failed to create log directory at {}", directory.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&directory, file_name));
    if GUARD.set(guard).is_err() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_names(true),
        )
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}

/// Pick the log file: explicit override, then `$XDG_STATE_HOME`, then
/// `~/.local/state`, then the working directory.
fn log_path(
    explicit: Option<String>,
    state_home: Option<String>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(path) = explicit.filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    let state_dir = match (state_home.filter(|s| !s.is_empty()), home) {
        (Some(state_home), _) => PathBuf::from(state_home),
        (None, Some(home)) => home.join(".local").join("state"),
        (None, None) => return Ok(std::env::current_dir()?.join("thor-runner.log")),
    };
    Ok(state_dir.join("thor-runner").join("thor-runner.log"))
}

fn split_path(path: &Path) -> Result<(PathBuf, &str)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid log file name: {}", path.display()))?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok((dir, file_name))
}
