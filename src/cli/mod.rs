//! CLI command implementations
//!
//! Argument types and handlers live here rather than in `main.rs` so they
//! can be unit tested.

// CLI glue code - relaxed lint requirements
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

use std::fmt::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    RunConfig, StrategyConfig, DEFAULT_DISTRIBUTED_BLOCK_SIZE, DEFAULT_DISTRIBUTED_N,
    DEFAULT_OFFLOAD_BLOCK_SIZE, DEFAULT_OFFLOAD_N,
};
use crate::content::ContentGenerator;
use crate::device::QueueMode;
use crate::display::{format_matrix, format_vector, should_print};
use crate::error::Result;
use crate::kernel::MultiplierKind;
use crate::runner::{execute, RunReport};
use crate::team::{TeamLayout, TileDistribution};

/// Tiled dense matrix-vector multiply
///
/// Computes y = A·x for a generated N×N matrix split into BS×BS tiles, either
/// by staging tiles through a compute device or by combining partial sums
/// across a team of workers.
#[derive(Debug, Parser)]
#[command(name = "tiled-mxv")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug); overrides RUST_LOG
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by the strategy subcommands
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Block kernel: loop or simd
    #[arg(short, long, default_value = "loop")]
    pub multiplier: MultiplierKind,

    /// Check generated operands and the product
    #[arg(long)]
    pub verify: bool,

    /// Print the run report as JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Subcommands, one per execution strategy plus config-file runs
#[derive(Debug, Subcommand)]
#[allow(missing_docs)] // flattened shared flags
pub enum Commands {
    /// Stage tiles through a compute device
    ///
    /// Examples:
    ///   tiled-mxv offload
    ///   tiled-mxv offload 4096 256 --queue deferred
    Offload {
        /// Problem size N
        #[arg(value_name = "N", default_value_t = DEFAULT_OFFLOAD_N)]
        n: usize,

        /// Block size BS
        #[arg(value_name = "BS", default_value_t = DEFAULT_OFFLOAD_BLOCK_SIZE)]
        block_size: usize,

        /// Device queue mode: blocking or deferred
        #[arg(short, long, default_value = "blocking")]
        queue: QueueMode,

        /// Device memory limit in bytes
        #[arg(long, value_name = "BYTES")]
        device_memory: Option<usize>,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Combine tile partial sums across a worker team
    ///
    /// Examples:
    ///   tiled-mxv distributed
    ///   tiled-mxv distributed 1000 16 --workers 6 --layout 3x2
    Distributed {
        /// Problem size N
        #[arg(value_name = "N", default_value_t = DEFAULT_DISTRIBUTED_N)]
        n: usize,

        /// Block size BS
        #[arg(value_name = "BS", default_value_t = DEFAULT_DISTRIBUTED_BLOCK_SIZE)]
        block_size: usize,

        /// Team size (defaults to available parallelism)
        #[arg(short, long, env = "TILED_MXV_WORKERS")]
        workers: Option<usize>,

        /// Team layout as RxC (defaults to the most square factorization)
        #[arg(short, long)]
        layout: Option<TeamLayout>,

        /// Tile distribution: cyclic or blocked
        #[arg(short, long, default_value = "cyclic")]
        distribution: TileDistribution,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Run a JSON configuration file
    Run {
        /// Path to the configuration
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Print the run report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// What a subcommand resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Run to execute
    pub config: RunConfig,
    /// Output format
    pub json: bool,
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Turn a parsed subcommand into a validated run
pub fn resolve(command: &Commands) -> Result<Invocation> {
    let (config, json) = match command {
        Commands::Offload {
            n,
            block_size,
            queue,
            device_memory,
            common,
        } => {
            let config = RunConfig {
                n: *n,
                block_size: *block_size,
                multiplier: common.multiplier,
                verify: common.verify,
                strategy: StrategyConfig::StagedOffload {
                    queue: *queue,
                    device_memory: *device_memory,
                },
            };
            (config, common.json)
        },
        Commands::Distributed {
            n,
            block_size,
            workers,
            layout,
            distribution,
            common,
        } => {
            let workers = workers
                .or_else(|| layout.map(|l| l.size()))
                .unwrap_or_else(default_workers);
            let config = RunConfig {
                n: *n,
                block_size: *block_size,
                multiplier: common.multiplier,
                verify: common.verify,
                strategy: StrategyConfig::DistributedTile {
                    workers,
                    layout: *layout,
                    distribution: *distribution,
                },
            };
            (config, common.json)
        },
        Commands::Run { config, json } => (RunConfig::from_json_file(config)?, *json),
    };
    config.validate()?;
    Ok(Invocation { config, json })
}

/// Human-readable report: configuration, small operands, compute time
pub fn render_text(report: &RunReport) -> String {
    let config = &report.config;
    let mut out = String::new();
    let _ = writeln!(out, "N   = {}", config.n);
    let _ = writeln!(out, "BS  = {}", config.block_size);
    let _ = writeln!(out, "NBS = {}", report.num_blocks);
    let _ = writeln!(out, "NS  = {}", report.padded);
    let _ = writeln!(out, "strategy   = {}", report.strategy);
    if let Some(layout) = config.strategy.resolved_layout() {
        let _ = writeln!(out, "layout     = {layout}");
    }
    let _ = writeln!(out, "multiplier = {}", report.multiplier);

    if should_print(config.n) {
        if let Ok(tiling) = config.tiling() {
            let content = ContentGenerator::new(tiling);
            let x: Vec<f64> = (0..config.n).map(|i| content.x_value(i)).collect();
            out.push_str("A =\n");
            out.push_str(&format_matrix(config.n, |r, c| content.matrix_value(r, c)));
            out.push_str("x =\n");
            out.push_str(&format_vector(&x));
            out.push_str("y =\n");
            out.push_str(&format_vector(&report.y));
        }
    }

    if config.verify {
        let _ = writeln!(
            out,
            "verification: {} input mismatches, {} result mismatches",
            report.input_mismatches, report.result_mismatches
        );
    }
    let _ = writeln!(out, "elapsed: {} us", report.elapsed_us);
    out
}

/// Main CLI entrypoint: resolve, run, print
pub fn entrypoint(cli: Cli) -> Result<()> {
    let invocation = resolve(&cli.command)?;
    let report = execute(&invocation.config)?;
    if invocation.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_text(&report));
    }
    Ok(())
}
