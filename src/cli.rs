use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use thor_runner::{PermissionRequest, RunnerConfig};

use crate::command;

#[derive(Parser)]
#[command(author, version, long_about = None)]
#[command(name = "thor-runner")]
#[command(about = "Run sandboxed Deno scripts in throwaway working directories")]
struct Cli {
    /// Path to a YAML config file (default: ~/.config/thor-runner/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Runtime binary to use instead of the configured one
    #[arg(long, global = true)]
    runtime: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the runtime is installed
    Check,

    /// Run a script in a fresh instance directory
    Run {
        /// Script path or URL passed to the runtime
        target: String,

        /// Repository to clone into the instance directory first
        #[arg(long)]
        repo: Option<String>,

        /// Permission to grant, e.g. `allowRead=/data` or `allow-net=deno.land` (repeatable)
        #[arg(short = 'a', long = "allow", value_name = "PERMISSION")]
        permissions: Vec<PermissionRequest>,

        /// Directory in which instance directories are created
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Do not print the exit code line before cleanup
        #[arg(long)]
        no_exit_line: bool,

        /// Print events as JSON lines on stdout
        #[arg(long)]
        json: bool,

        /// Arguments passed through to the script
        #[arg(last = true)]
        params: Vec<String>,
    },
}

/// Parse arguments and dispatch. Returns the process exit code.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut config = RunnerConfig::load(cli.config.as_deref())?;
    if let Some(runtime) = cli.runtime {
        config.runtime = Some(runtime);
    }

    match cli.command {
        Commands::Check => command::check::run(config),
        Commands::Run {
            target,
            repo,
            permissions,
            base_dir,
            no_exit_line,
            json,
            params,
        } => {
            if let Some(base_dir) = base_dir {
                config.base_dir = Some(base_dir);
            }
            if no_exit_line {
                config.report_exit_code = Some(false);
            }
            command::run::run(
                config,
                command::run::RunArgs {
                    target,
                    repo,
                    permissions,
                    params,
                    json,
                },
            )
        }
    }
}
