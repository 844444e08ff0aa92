//! tiled-mxv CLI - tiled dense matrix-vector multiply
//!
//! # Commands
//!
//! - `offload` - Stage tiles through a compute device
//! - `distributed` - Combine tile partial sums across a worker team
//! - `run` - Run a JSON configuration file

use std::process::ExitCode;

use clap::Parser;
use tiled_mxv::cli::{entrypoint, Cli};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match entrypoint(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}
