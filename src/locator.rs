//! Discovery of the runtime binary on the search path.

use std::ffi::OsString;
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::{Result, RunnerError};

pub const DEFAULT_RUNTIME: &str = "deno";

#[derive(Debug, Clone)]
pub struct RuntimeLocator {
    binary: String,
    search_path: Option<OsString>,
}

impl RuntimeLocator {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            search_path: None,
        }
    }

    /// Search these directories instead of `PATH`.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Resolve the absolute path of the runtime binary.
    pub fn resolve_path(&self) -> Result<PathBuf> {
        let resolved = match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_default();
                which::which_in(&self.binary, Some(paths), cwd)
            }
            None => which::which(&self.binary),
        };

        resolved.map_err(|source| RunnerError::RuntimeNotFound {
            binary: self.binary.clone(),
            source,
        })
    }

    /// Whether the runtime can be found. Any lookup failure reads as `false`.
    pub fn is_ready(&self) -> bool {
        match self.resolve_path() {
            Ok(path) => {
                trace!(binary = %self.binary, path = %path.display(), "locator:ready");
                true
            }
            Err(e) => {
                debug!(error = %e, "locator:not ready");
                false
            }
        }
    }

    /// The program to spawn: the resolved path, or the bare name so the OS
    /// gets a chance to find it when resolution failed.
    pub fn invocation(&self) -> PathBuf {
        self.resolve_path().unwrap_or_else(|e| {
            debug!(error = %e, "locator:falling back to bare binary name");
            PathBuf::from(&self.binary)
        })
    }
}

impl Default for RuntimeLocator {
    fn default() -> Self {
        Self::new(DEFAULT_RUNTIME)
    }
}
