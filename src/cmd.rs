use std::path::Path;
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, trace};

/// A builder for running short-lived helper commands to completion
pub struct Cmd<'a> {
    command: &'a str,
    args: Vec<&'a str>,
    envs: Vec<(&'a str, &'a str)>,
    workdir: Option<&'a Path>,
}

impl<'a> Cmd<'a> {
    pub fn new(command: &'a str) -> Self {
        Self {
            command,
            args: Vec::new(),
            envs: Vec::new(),
            workdir: None,
        }
    }

    pub fn args(mut self, args: &[&'a str]) -> Self {
        self.args.extend_from_slice(args);
        self
    }

    pub fn env(mut self, key: &'a str, value: &'a str) -> Self {
        self.envs.push((key, value));
        self
    }

    pub fn workdir(mut self, path: &'a Path) -> Self {
        self.workdir = Some(path);
        self
    }

    /// Run to completion, failing on a non-zero exit with stderr in the message.
    /// stdin is null; tools that prompt on the controlling terminal need their
    /// own opt-out through `env`.
    pub fn run(self) -> Result<Output> {
        let Cmd {
            command,
            args,
            envs,
            workdir,
        } = self;
        let workdir_display = workdir.map(|p| p.display().to_string());

        trace!(command, args = ?args, workdir = ?workdir_display, "cmd:run start");

        let mut cmd = Command::new(command);
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }
        let output = cmd
            .args(&args)
            .envs(envs.iter().copied())
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute command: {} {}", command, args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                command,
                args = ?args,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "cmd:run failure"
            );
            return Err(anyhow!(
                "Command failed: {} {}\n{}",
                command,
                args.join(" "),
                stderr.trim()
            ));
        }
        trace!(command, "cmd:run success");
        Ok(output)
    }
}
