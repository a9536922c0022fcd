use std::io;
use std::path::PathBuf;

/// Errors raised while locating, provisioning or supervising a run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The runtime binary is not on the search path.
    #[error("Runtime '{binary}' not found on the search path")]
    RuntimeNotFound {
        binary: String,
        #[source]
        source: which::Error,
    },

    /// The instance directory could not be created.
    #[error("Failed to create instance directory {}: {source}", path.display())]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The repository could not be cloned into the instance directory.
    #[error("Failed to clone {url}: {message}")]
    Clone { url: String, message: String },

    /// The runtime process could not be started.
    #[error("Failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The instance directory could not be removed after exit.
    #[error("Failed to remove instance directory {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A signal could not be delivered to the child.
    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },
}

pub type Result<T> = std::result::Result<T, RunnerError>;
