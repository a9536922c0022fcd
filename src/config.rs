use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::git::DEFAULT_GIT;
use crate::instance::DEFAULT_ID_LENGTH;
use crate::locator::DEFAULT_RUNTIME;

pub const DEFAULT_INSTANCE_ENV_VAR: &str = "THOR_INSTANCE_DIR";

/// Runner configuration, read from `~/.config/thor-runner/config.yaml`
/// or an explicit path
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Runtime binary name or path. Default: deno
    pub runtime: Option<String>,

    /// Git binary name or path. Default: git
    pub git: Option<String>,

    /// Directory under which instance directories are created.
    /// Default: the current working directory
    pub base_dir: Option<PathBuf>,

    /// Environment variable carrying the instance directory to the script.
    /// Default: THOR_INSTANCE_DIR
    pub instance_env_var: Option<String>,

    /// Emit a "Process exited with code N" line before cleanup. Default: true
    pub report_exit_code: Option<bool>,

    /// Length of generated instance ids (clamped to 8-64). Default: 12
    pub id_length: Option<usize>,
}

impl RunnerConfig {
    pub fn runtime(&self) -> &str {
        self.runtime.as_deref().unwrap_or(DEFAULT_RUNTIME)
    }

    pub fn git(&self) -> &str {
        self.git.as_deref().unwrap_or(DEFAULT_GIT)
    }

    pub fn instance_env_var(&self) -> &str {
        self.instance_env_var
            .as_deref()
            .unwrap_or(DEFAULT_INSTANCE_ENV_VAR)
    }

    pub fn report_exit_code(&self) -> bool {
        self.report_exit_code.unwrap_or(true)
    }

    pub fn id_length(&self) -> usize {
        self.id_length.unwrap_or(DEFAULT_ID_LENGTH).clamp(8, 64)
    }

    /// The configured base directory, or the current working directory.
    pub fn resolved_base_dir(&self) -> PathBuf {
        self.base_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Load from `path` if given, otherwise from the global config file.
    /// A missing global file yields the defaults; a missing explicit one is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        debug!(path = ?path, "config:loading");
        let config = match path {
            Some(path) => Self::load_from_path(path)?
                .ok_or_else(|| anyhow::anyhow!("Config file not found: {}", path.display()))?,
            None => Self::load_global()?.unwrap_or_default(),
        };
        debug!(config = ?config, "config:loaded");
        Ok(config)
    }

    fn load_from_path(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "config:reading file");
        let contents = fs::read_to_string(path)?;
        let config: RunnerConfig = serde_yaml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config at {}: {}", path.display(), e))?;
        Ok(Some(config))
    }

    fn load_global() -> anyhow::Result<Option<Self>> {
        if let Some(home_dir) = home::home_dir() {
            for name in ["config.yaml", "config.yml"] {
                let path = home_dir.join(".config/thor-runner").join(name);
                if path.exists() {
                    return Self::load_from_path(&path);
                }
            }
        }
        Ok(None)
    }
}
