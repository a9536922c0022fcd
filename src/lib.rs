//! Launch and supervise sandboxed Deno scripts.
//!
//! Each run gets its own freshly created working directory, optionally
//! populated by cloning a repository, and a child `deno run` process whose
//! permission flags are derived from the caller's capability requests. Output
//! is streamed line by line as [`RunEvent`]s; when the child terminates its
//! directory is removed before the final [`RunEvent::Exited`] is delivered.
//!
//! ```no_run
//! use thor_runner::{PermissionRequest, RunRequest, Runner, RunnerConfig};
//!
//! let runner = Runner::new(RunnerConfig::default());
//! if runner.is_ready() {
//!     let request = RunRequest::new("main.ts")
//!         .permission(PermissionRequest::option("allowNet", Some("deno.land")))
//!         .params(["--verbose"]);
//!     let run = runner.run(request)?;
//!     let code = run.wait(|channel, line| println!("[{:?}] {}", channel, line));
//!     println!("exited with {:?}", code);
//! }
//! # Ok::<(), thor_runner::RunnerError>(())
//! ```

mod cmd;
pub mod config;
pub mod error;
pub mod git;
pub mod instance;
pub mod locator;
pub mod permissions;
pub mod runner;
pub mod supervisor;

pub use config::RunnerConfig;
pub use error::RunnerError;
pub use instance::{Instance, Provisioner};
pub use locator::RuntimeLocator;
pub use nix::sys::signal::Signal;
pub use permissions::{PermissionEntry, PermissionRequest, convert_to_kebab_case, encode_permissions};
pub use runner::{Run, RunRequest, Runner};
pub use supervisor::{Channel, RunEvent, RunHandle};
