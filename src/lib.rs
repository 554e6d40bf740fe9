pub mod artifact;
pub mod backup;
pub mod check;
mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod fileset;
pub mod instance;
pub mod orchestrator;
pub mod paths;
pub mod process;

use std::process::ExitCode;

use clap::Parser as _;

pub use cli::{Cli, Command};
pub use error::{AppError, ErrorKind, Result};

/// Parse arguments, install logging and run one command to completion.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .format_timestamp_millis()
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli.execute()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
