//! Supervision of a single runtime child process.
//!
//! The child's stdout and stderr are each drained by a pump thread that turns
//! bytes into [`RunEvent::Output`] lines. A waiter thread owns the child and,
//! once it terminates, flushes the pumps, removes the instance directory and
//! only then sends [`RunEvent::Exited`]. That event is sent exactly once per
//! started child; if the child never starts the channel simply closes.
//!
//! The child is only reaped while the liveness lock is held, and [`RunHandle::kill`]
//! signals under the same lock, so a signal can never reach a recycled pid.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RunnerError};
use crate::instance::Instance;

/// Subcommand passed to the runtime before anything else.
pub const RUN_SUBCOMMAND: &str = "run";

/// How often the waiter checks whether the child has exited.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    pub fn is_error(self) -> bool {
        self == Channel::Stderr
    }
}

/// Lifecycle events produced by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Output { channel: Channel, line: String },
    Exited { code: i32 },
}

impl RunEvent {
    pub(crate) fn stdout(line: impl Into<String>) -> Self {
        RunEvent::Output {
            channel: Channel::Stdout,
            line: line.into(),
        }
    }

    pub(crate) fn stderr(line: impl Into<String>) -> Self {
        RunEvent::Output {
            channel: Channel::Stderr,
            line: line.into(),
        }
    }
}

/// Send an event, ignoring a receiver that has gone away.
/// The child must keep being drained even when nobody listens.
pub(crate) fn emit(tx: &Sender<RunEvent>, event: RunEvent) {
    let _ = tx.send(event);
}

/// Control handle for a running instance.
#[derive(Debug, Clone)]
pub struct RunHandle {
    instance_id: String,
    path: PathBuf,
    pid: Option<u32>,
    /// True until the child has been reaped.
    live: Arc<Mutex<bool>>,
}

fn lock(live: &Mutex<bool>) -> MutexGuard<'_, bool> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RunHandle {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.live)
    }

    /// Signal the child (SIGTERM unless given). The usual exit path follows,
    /// so cleanup and the `Exited` event happen as for a natural exit.
    /// A child that already exited is not an error.
    pub fn kill(&self, signal: Option<Signal>) -> Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        // Held across the signal: the waiter cannot reap in between.
        let live = lock(&self.live);
        if !*live {
            debug!(pid, "supervisor:kill skipped, not running");
            return Ok(());
        }

        let signal = signal.unwrap_or(Signal::SIGTERM);
        info!(instance_id = %self.instance_id, pid, ?signal, "supervisor:kill");
        match nix::sys::signal::kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(RunnerError::Signal { pid, source }),
        }
    }
}

/// Everything the supervisor needs to start the child.
#[derive(Debug, Clone)]
pub struct Launch {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env_var: String,
    pub report_exit_code: bool,
}

/// Argument vector: subcommand, flags, target, then caller params.
pub fn build_args(flags: &[String], target: &str, params: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(flags.len() + params.len() + 2);
    args.push(RUN_SUBCOMMAND.to_string());
    args.extend(flags.iter().cloned());
    args.push(target.to_string());
    args.extend(params.iter().cloned());
    args
}

/// Start the child inside `instance` and supervise it.
///
/// A spawn failure is reported as a stderr line and the instance directory is
/// removed; no `Exited` event follows and the returned handle never runs.
pub fn spawn(launch: Launch, instance: Instance, tx: Sender<RunEvent>) -> RunHandle {
    let live = Arc::new(Mutex::new(false));

    let mut command = Command::new(&launch.program);
    command
        .args(&launch.args)
        .current_dir(&instance.path)
        .env(&launch.env_var, &instance.path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            let err = RunnerError::Spawn {
                program: launch.program.clone(),
                source,
            };
            error!(instance_id = %instance.id, error = %err, "supervisor:spawn failed");
            emit(&tx, RunEvent::stderr(err.to_string()));
            if let Err(e) = remove_instance_dir(&instance.path) {
                warn!(error = %e, "cleanup:failed");
            }
            return RunHandle {
                instance_id: instance.id,
                path: instance.path,
                pid: None,
                live,
            };
        }
    };

    let pid = child.id();
    *lock(&live) = true;
    info!(
        instance_id = %instance.id,
        pid,
        program = %launch.program.display(),
        args = ?launch.args,
        "supervisor:spawned"
    );

    let handle = RunHandle {
        instance_id: instance.id.clone(),
        path: instance.path.clone(),
        pid: Some(pid),
        live: Arc::clone(&live),
    };

    let report_exit_code = launch.report_exit_code;
    thread::spawn(move || {
        supervise(child, instance, live, report_exit_code, tx);
    });

    handle
}

fn supervise(
    mut child: Child,
    instance: Instance,
    live: Arc<Mutex<bool>>,
    report_exit_code: bool,
    tx: Sender<RunEvent>,
) {
    let mut pumps: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        pumps.push(thread::spawn(move || pump_lines(stdout, Channel::Stdout, &tx)));
    }
    if let Some(stderr) = child.stderr.take() {
        let tx = tx.clone();
        pumps.push(thread::spawn(move || pump_lines(stderr, Channel::Stderr, &tx)));
    }

    let code = reap(&mut child, &live, &instance.id);
    info!(instance_id = %instance.id, code, "supervisor:exited");

    // Streams must be fully drained before cleanup starts.
    for pump in pumps {
        let _ = pump.join();
    }

    if report_exit_code {
        emit(&tx, RunEvent::stdout(format!("Process exited with code {}", code)));
    }
    emit(&tx, RunEvent::stdout(format!("Cleaning up instance {}", instance.id)));
    if let Err(e) = remove_instance_dir(&instance.path) {
        warn!(instance_id = %instance.id, error = %e, "cleanup:failed");
        emit(&tx, RunEvent::stderr(e.to_string()));
    }

    emit(&tx, RunEvent::Exited { code });
}

/// Poll until the child exits, reaping it and clearing `live` under one lock.
/// Signal termination yields no code; report it as 0.
fn reap(child: &mut Child, live: &Mutex<bool>, instance_id: &str) -> i32 {
    loop {
        let mut guard = lock(live);
        match child.try_wait() {
            Ok(Some(status)) => {
                *guard = false;
                return status.code().unwrap_or(0);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(instance_id, error = %e, "supervisor:wait failed");
                *guard = false;
                return 0;
            }
        }
        drop(guard);
        thread::sleep(REAP_POLL_INTERVAL);
    }
}

/// Forward each complete line from `reader` as soon as it is read.
fn pump_lines<R: Read>(reader: R, channel: Channel, tx: &Sender<RunEvent>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if let Some(line) = clean_line(&buf) {
                    emit(tx, RunEvent::Output { channel, line });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(?channel, error = %e, "supervisor:stream read failed");
                break;
            }
        }
    }
}

/// Strip a `\n` or `\r\n` terminator; blank lines become `None`.
fn clean_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    if line.trim().is_empty() {
        None
    } else {
        Some(line.into_owned())
    }
}

/// Recursively remove an instance directory. Already gone counts as removed.
pub fn remove_instance_dir(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            debug!(path = %path.display(), "cleanup:removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RunnerError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Drain `events` until the run exits, passing output lines to `on_output`.
/// Returns `None` when the channel closes without an exit (the child never started).
pub fn wait_for_exit(
    events: Receiver<RunEvent>,
    mut on_output: impl FnMut(Channel, &str),
) -> Option<i32> {
    for event in events {
        match event {
            RunEvent::Output { channel, line } => on_output(channel, &line),
            RunEvent::Exited { code } => return Some(code),
        }
    }
    None
}
