mod cli;
mod command;
mod logger;

use anyhow::Result;
use tracing::{error, info};

fn main() -> Result<()> {
    logger::init()?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "thor-runner start");

    match cli::run() {
        Ok(code) => {
            info!(code, "thor-runner finished");
            std::process::exit(code);
        }
        Err(err) => {
            error!(error = ?err, "thor-runner failed");
            Err(err)
        }
    }
}
