//! Caller-facing entry point: readiness check and run orchestration.

use std::sync::mpsc::{self, Receiver};

use tracing::{info, warn};

use crate::config::RunnerConfig;
use crate::error::Result;
use crate::git;
use crate::instance::Provisioner;
use crate::locator::RuntimeLocator;
use crate::permissions::{PermissionRequest, encode_permissions};
use crate::supervisor::{self, Channel, Launch, RunEvent, RunHandle};

/// What to run. Moved into [`Runner::run`] and not changed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub target_location: String,
    pub repo_url: Option<String>,
    pub permissions: Vec<PermissionRequest>,
    pub params: Vec<String>,
}

impl RunRequest {
    pub fn new(target_location: impl Into<String>) -> Self {
        Self {
            target_location: target_location.into(),
            ..Default::default()
        }
    }

    pub fn repo_url(mut self, url: impl Into<String>) -> Self {
        self.repo_url = Some(url.into());
        self
    }

    pub fn permission(mut self, permission: PermissionRequest) -> Self {
        self.permissions.push(permission);
        self
    }

    pub fn permissions(mut self, permissions: impl IntoIterator<Item = PermissionRequest>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }
}

/// A started run: its control handle and the stream of its events.
pub struct Run {
    pub handle: RunHandle,
    pub events: Receiver<RunEvent>,
}

impl Run {
    /// Block until the run exits, passing output lines to `on_output`.
    /// `None` means the child never started.
    pub fn wait(self, on_output: impl FnMut(Channel, &str)) -> Option<i32> {
        supervisor::wait_for_exit(self.events, on_output)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn locator(&self) -> RuntimeLocator {
        RuntimeLocator::new(self.config.runtime())
    }

    pub fn is_ready(&self) -> bool {
        self.locator().is_ready()
    }

    /// Provision an instance, optionally clone into it, and start the runtime.
    ///
    /// Only a failure to create the instance directory is returned as an
    /// error. Clone and spawn failures arrive as stderr lines on `events`.
    pub fn run(&self, request: RunRequest) -> Result<Run> {
        let program = self.locator().invocation();
        let provisioner = Provisioner::new(self.config.resolved_base_dir())
            .with_id_length(self.config.id_length());
        let instance = provisioner.provision()?;
        info!(
            instance_id = %instance.id,
            target = %request.target_location,
            repo = ?request.repo_url,
            "run:start"
        );

        let (tx, events) = mpsc::channel();

        if let Some(url) = &request.repo_url
            && let Err(e) = git::clone_into(self.config.git(), url, &instance.path)
        {
            warn!(instance_id = %instance.id, error = %e, "clone:failed, continuing");
            supervisor::emit(&tx, RunEvent::stderr(e.to_string()));
        }

        let env_var = self.config.instance_env_var().to_string();
        let mut permissions = request.permissions;
        permissions.extend(instance.sandbox_permissions(&env_var));
        let flags = encode_permissions(&permissions);

        let launch = Launch {
            program,
            args: supervisor::build_args(&flags, &request.target_location, &request.params),
            env_var,
            report_exit_code: self.config.report_exit_code(),
        };
        let handle = supervisor::spawn(launch, instance, tx);

        Ok(Run { handle, events })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::RunnerError;
    use nix::sys::signal::Signal;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Write an executable `/bin/sh` script standing in for the runtime.
    fn fake_runtime(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-deno");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    struct Fixture {
        _bin: TempDir,
        base: TempDir,
        runner: Runner,
    }

    fn fixture(body: &str) -> Fixture {
        let bin = TempDir::new().unwrap();
        let base = TempDir::new().unwrap();
        let runtime = fake_runtime(bin.path(), body);
        let config = RunnerConfig {
            runtime: Some(runtime.to_string_lossy().into_owned()),
            base_dir: Some(base.path().to_path_buf()),
            ..Default::default()
        };
        Fixture {
            _bin: bin,
            base,
            runner: Runner::new(config),
        }
    }

    /// Collect every event until the channel closes.
    fn collect(events: &Receiver<RunEvent>) -> Vec<RunEvent> {
        let mut out = Vec::new();
        loop {
            match events.recv_timeout(Duration::from_secs(30)) {
                Ok(event) => out.push(event),
                Err(mpsc::RecvTimeoutError::Disconnected) => return out,
                Err(mpsc::RecvTimeoutError::Timeout) => panic!("run timed out: {:?}", out),
            }
        }
    }

    fn lines(events: &[RunEvent], want: Channel) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Output { channel, line } if *channel == want => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    fn exits(events: &[RunEvent]) -> Vec<i32> {
        events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Exited { code } => Some(*code),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_is_ready_with_fake_runtime() {
        let fx = fixture("exit 0");
        assert!(fx.runner.is_ready());

        let missing = Runner::new(RunnerConfig {
            runtime: Some("/nonexistent/thor-runtime".to_string()),
            ..Default::default()
        });
        assert!(!missing.is_ready());
    }

    #[test]
    fn test_streams_lines_and_reports_exit() {
        let fx = fixture(
            r#"echo "args: $*"
echo "env: $THOR_INSTANCE_DIR"
printf 'a\r\nb\n\n   \n'
echo oops >&2
exit 3"#,
        );
        let request = RunRequest::new("main.ts")
            .permission(PermissionRequest::option("allowNet", Some("deno.land")))
            .params(["one", "two"]);

        let run = fx.runner.run(request).unwrap();
        let path = run.handle.path().to_path_buf();
        let events = collect(&run.events);

        let stdout = lines(&events, Channel::Stdout);
        let expected_args = format!(
            "args: run --allow-net=deno.land --allow-read={} --allow-env=THOR_INSTANCE_DIR main.ts one two",
            path.display()
        );
        assert_eq!(stdout[0], expected_args);
        assert_eq!(stdout[1], format!("env: {}", path.display()));
        assert_eq!(stdout[2], "a");
        assert_eq!(stdout[3], "b");
        assert_eq!(stdout[4], "Process exited with code 3");
        assert_eq!(
            stdout[5],
            format!("Cleaning up instance {}", run.handle.instance_id())
        );
        assert_eq!(stdout.len(), 6);
        assert_eq!(lines(&events, Channel::Stderr), vec!["oops"]);

        assert_eq!(exits(&events), vec![3]);
        assert_eq!(events.last(), Some(&RunEvent::Exited { code: 3 }));
        assert!(!run.handle.is_running());
        assert!(!path.exists());
    }

    #[test]
    fn test_lines_arrive_while_child_is_still_running() {
        let fx = fixture("echo first\nexec sleep 30");
        let run = fx.runner.run(RunRequest::new("main.ts")).unwrap();

        let first = run.events.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(first, RunEvent::stdout("first"));
        assert!(run.handle.is_running());
        assert!(run.handle.path().exists());

        run.handle.kill(None).unwrap();
        let events = collect(&run.events);
        assert_eq!(exits(&events), vec![0]);
    }

    #[test]
    fn test_cleanup_failure_is_reported_before_single_exit() {
        // Swap the instance directory for a plain file so recursive removal fails.
        let fx = fixture(
            r#"cd /
rmdir "$THOR_INSTANCE_DIR"
echo occupied > "$THOR_INSTANCE_DIR"
exit 6"#,
        );
        let run = fx.runner.run(RunRequest::new("main.ts")).unwrap();
        let events = collect(&run.events);

        let position = |want: Channel, text: &str| {
            events.iter().position(|e| {
                matches!(e, RunEvent::Output { channel, line } if *channel == want && line.contains(text))
            })
        };
        let cleaning = position(Channel::Stdout, "Cleaning up instance").unwrap();
        let failure = position(Channel::Stderr, "Failed to remove instance directory")
            .unwrap_or_else(|| panic!("no cleanup failure line: {:?}", events));
        assert!(cleaning < failure);
        assert_eq!(exits(&events), vec![6]);
        assert_eq!(events.last(), Some(&RunEvent::Exited { code: 6 }));
        assert!(!run.handle.is_running());
    }

    #[test]
    fn test_bare_permission_is_not_narrowed_by_instance_scope() {
        let fx = fixture(r#"echo "args: $*""#);
        let request = RunRequest::new("main.ts")
            .permission(PermissionRequest::flag("allow-read"))
            .permission(PermissionRequest::flag("allow-env"));

        let run = fx.runner.run(request).unwrap();
        let events = collect(&run.events);
        assert_eq!(
            lines(&events, Channel::Stdout)[0],
            "args: run --allow-read --allow-env main.ts"
        );
    }

    #[test]
    fn test_exit_code_line_can_be_disabled() {
        let mut fx = fixture("echo hi");
        fx.runner.config.report_exit_code = Some(false);

        let run = fx.runner.run(RunRequest::new("main.ts")).unwrap();
        let events = collect(&run.events);

        let stdout = lines(&events, Channel::Stdout);
        assert_eq!(stdout[0], "hi");
        assert!(!stdout.iter().any(|l| l.starts_with("Process exited")));
        assert!(stdout.iter().any(|l| l.starts_with("Cleaning up instance")));
        assert_eq!(exits(&events), vec![0]);
    }

    #[test]
    fn test_kill_runs_cleanup_once() {
        let fx = fixture("exec sleep 30");
        let run = fx.runner.run(RunRequest::new("main.ts")).unwrap();
        let path = run.handle.path().to_path_buf();
        assert!(run.handle.is_running());
        assert!(path.exists());

        run.handle.kill(None).unwrap();
        let events = collect(&run.events);

        assert_eq!(exits(&events), vec![0]);
        assert!(!run.handle.is_running());
        assert!(!path.exists());
        // Killing after exit is a no-op.
        run.handle.kill(Some(Signal::SIGKILL)).unwrap();
    }

    #[test]
    fn test_wait_returns_exit_code() {
        let fx = fixture("echo done\nexit 5");
        let run = fx.runner.run(RunRequest::new("main.ts")).unwrap();

        let mut seen = Vec::new();
        let code = run.wait(|channel, line| seen.push((channel, line.to_string())));
        assert_eq!(code, Some(5));
        assert_eq!(seen[0], (Channel::Stdout, "done".to_string()));
    }

    #[test]
    fn test_directory_create_error_fails_run() {
        let mut fx = fixture("exit 0");
        fx.runner.config.base_dir = Some(fx.base.path().join("missing/dir"));

        let result = fx.runner.run(RunRequest::new("main.ts"));
        assert!(matches!(result, Err(RunnerError::DirectoryCreate { .. })));
    }

    #[test]
    fn test_spawn_failure_reports_without_exit() {
        let base = TempDir::new().unwrap();
        let runner = Runner::new(RunnerConfig {
            runtime: Some("/nonexistent/thor-runtime".to_string()),
            base_dir: Some(base.path().to_path_buf()),
            ..Default::default()
        });

        let run = runner.run(RunRequest::new("main.ts")).unwrap();
        let events = collect(&run.events);

        let stderr = lines(&events, Channel::Stderr);
        assert_eq!(stderr.len(), 1);
        assert!(stderr[0].contains("Failed to spawn"));
        assert!(exits(&events).is_empty());
        assert!(!run.handle.is_running());
        assert!(run.handle.pid().is_none());
        assert!(!run.handle.path().exists());
    }

    #[test]
    fn test_clone_completes_before_first_line() {
        if !crate::git::tests::git_available() {
            return;
        }
        let fx = fixture("ls");
        let src = TempDir::new().unwrap();
        let repo = crate::git::tests::make_source_repo(src.path());

        let request = RunRequest::new("main.ts").repo_url(repo.to_string_lossy());
        let run = fx.runner.run(request).unwrap();
        let events = collect(&run.events);

        assert_eq!(events[0], RunEvent::stdout("main.ts"));
        assert_eq!(exits(&events), vec![0]);
        assert!(!run.handle.path().exists());
    }

    #[test]
    fn test_failed_clone_still_starts_runtime() {
        let fx = fixture("echo started");
        let missing = fx.base.path().join("no-such-repo");

        let request = RunRequest::new("main.ts").repo_url(missing.to_string_lossy());
        let run = fx.runner.run(request).unwrap();
        let events = collect(&run.events);

        match &events[0] {
            RunEvent::Output { channel, line } => {
                assert!(channel.is_error());
                assert!(line.contains("Failed to clone"), "{}", line);
            }
            other => panic!("expected clone error line, got {:?}", other),
        }
        assert!(lines(&events, Channel::Stdout).contains(&"started".to_string()));
        assert_eq!(exits(&events), vec![0]);
    }

    #[test]
    fn test_concurrent_runs_are_independent() {
        let fx = fixture("echo \"$THOR_INSTANCE_DIR\"");
        let runs: Vec<Run> = (0..4)
            .map(|_| fx.runner.run(RunRequest::new("main.ts")).unwrap())
            .collect();

        for run in runs {
            let path = run.handle.path().to_path_buf();
            let events = collect(&run.events);
            assert_eq!(
                lines(&events, Channel::Stdout)[0],
                path.display().to_string()
            );
            assert_eq!(exits(&events), vec![0]);
        }
    }
}
