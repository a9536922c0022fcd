//! `thor-runner check`: report whether the runtime can be found.

use anyhow::Result;
use thor_runner::{Runner, RunnerConfig};

pub fn run(config: RunnerConfig) -> Result<i32> {
    let locator = Runner::new(config).locator();
    match locator.resolve_path() {
        Ok(path) => {
            println!("✔ {} is ready at {}", locator.binary(), path.display());
            Ok(0)
        }
        Err(e) => {
            eprintln!("✘ {}", e);
            Ok(1)
        }
    }
}
