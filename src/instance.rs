//! Provisioning of per-run working directories.
//!
//! Every run gets a directory named by a fresh random id directly under the
//! configured base directory. Creation is non-recursive so two runs can never
//! share a directory: a name collision surfaces as an error instead.

use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, RunnerError};
use crate::permissions::PermissionRequest;

/// URL-safe alphabet; 64 symbols so a masked random byte maps without bias.
const ID_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

pub const DEFAULT_ID_LENGTH: usize = 12;

/// Generate a random URL-safe identifier of `len` characters.
pub fn generate_instance_id(len: usize) -> io::Result<String> {
    let mut bytes = vec![0u8; len];
    getrandom::fill(&mut bytes).map_err(|e| io::Error::other(e.to_string()))?;
    Ok(bytes
        .iter()
        .map(|b| ID_ALPHABET[(b & 63) as usize] as char)
        .collect())
}

/// A provisioned working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub path: PathBuf,
}

impl Instance {
    /// Permissions every run receives so the script can read its own
    /// directory and learn where it is through `env_var`.
    pub fn sandbox_permissions(&self, env_var: &str) -> Vec<PermissionRequest> {
        vec![
            PermissionRequest::flag(format!("allow-read={}", self.path.display())),
            PermissionRequest::flag(format!("allow-env={}", env_var)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct Provisioner {
    base_dir: PathBuf,
    id_length: usize,
}

impl Provisioner {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            id_length: DEFAULT_ID_LENGTH,
        }
    }

    pub fn with_id_length(mut self, id_length: usize) -> Self {
        self.id_length = id_length;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create a fresh instance directory. Not retried on failure.
    pub fn provision(&self) -> Result<Instance> {
        let id = generate_instance_id(self.id_length).map_err(|source| {
            RunnerError::DirectoryCreate {
                path: self.base_dir.clone(),
                source,
            }
        })?;
        self.provision_with_id(id)
    }

    fn provision_with_id(&self, id: String) -> Result<Instance> {
        // Absolute so the path stays valid for the child regardless of its cwd.
        let path = self.base_dir.join(&id);
        let path = std::path::absolute(&path).unwrap_or(path);

        // The path becomes a value in `--allow-read=a,b`, where a comma splits it.
        if path.to_string_lossy().contains(',') {
            return Err(RunnerError::DirectoryCreate {
                path,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "path contains ',' which cannot be passed in a permission list",
                ),
            });
        }

        std::fs::create_dir(&path).map_err(|source| RunnerError::DirectoryCreate {
            path: path.clone(),
            source,
        })?;
        info!(instance_id = %id, path = %path.display(), "instance:created");
        Ok(Instance { id, path })
    }
}
