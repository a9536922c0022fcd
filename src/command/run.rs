//! `thor-runner run`: start a script and relay its output until it exits.

use std::io::Write;

use anyhow::{Context, Result};
use thor_runner::{Channel, PermissionRequest, RunEvent, RunRequest, Runner, RunnerConfig, Signal};
use tracing::{debug, warn};

pub struct RunArgs {
    pub target: String,
    pub repo: Option<String>,
    pub permissions: Vec<PermissionRequest>,
    pub params: Vec<String>,
    pub json: bool,
}

pub fn run(config: RunnerConfig, args: RunArgs) -> Result<i32> {
    let runner = Runner::new(config);
    if !runner.is_ready() {
        warn!(runtime = runner.config().runtime(), "runtime not found, trying bare name");
    }

    let mut request = RunRequest::new(args.target)
        .permissions(args.permissions)
        .params(args.params);
    request.repo_url = args.repo;

    let run = runner.run(request).context("Failed to start run")?;

    // Ctrl-C stops the child; the normal exit path still removes the instance.
    let handle = run.handle.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if let Err(e) = handle.kill(Some(Signal::SIGINT)) {
            warn!(error = %e, "failed to forward interrupt");
        }
    }) {
        debug!(error = %e, "could not install interrupt handler");
    }

    let mut exit_code = None;
    for event in run.events {
        if args.json {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer(&mut stdout, &event)?;
            writeln!(stdout)?;
        } else if let RunEvent::Output { channel, line } = &event {
            match channel {
                Channel::Stdout => println!("{}", line),
                Channel::Stderr => eprintln!("{}", line),
            }
        }
        if let RunEvent::Exited { code } = event {
            exit_code = Some(code);
        }
    }

    // The channel closed without an exit: the runtime never started.
    Ok(exit_code.unwrap_or(1))
}
