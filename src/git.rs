use std::path::Path;

use tracing::{debug, info};

use crate::cmd::Cmd;
use crate::error::{Result, RunnerError};

pub const DEFAULT_GIT: &str = "git";

/// Clone `url` into `dir` itself rather than into a subdirectory of it.
///
/// Credential prompts are disabled: a remote that needs auth fails instead of
/// waiting on the terminal.
pub fn clone_into(git: &str, url: &str, dir: &Path) -> Result<()> {
    info!(url, dir = %dir.display(), "clone:start");
    Cmd::new(git)
        .args(&["clone", url, "."])
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GCM_INTERACTIVE", "never")
        .workdir(dir)
        .run()
        .map_err(|e| {
            debug!(url, error = %e, "clone:failed");
            RunnerError::Clone {
                url: url.to_string(),
                message: format!("{:#}", e),
            }
        })?;
    info!(url, "clone:done");
    Ok(())
}
