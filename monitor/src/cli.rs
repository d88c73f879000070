//! # CLI Interface
//!
//! Defines the command-line argument structure for `hashchain-monitor`
//! using `clap` derive. Every tuning knob also reads from a `HASHCHAIN_*`
//! environment variable so the simulator can be configured from a shell
//! profile or a CI job without touching the command line.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

/// Header sync simulator for the hashchain index.
///
/// Drives one shared index with a header fetcher, a remote tip reporter and
/// a progress display, the same way a light client does while it syncs.
#[derive(Parser, Debug)]
#[command(
    name = "hashchain-monitor",
    about = "Header sync simulator for the hashchain index",
    version,
    propagate_version = true
)]
pub struct MonitorCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulated sync session and print the final status as JSON.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Server tip height reported before the first header arrives.
    #[arg(long, env = "HASHCHAIN_START_SERVER_HEIGHT", default_value_t = 500)]
    pub start_server_height: u64,

    /// Height at which the simulated server stops growing.
    #[arg(long, env = "HASHCHAIN_TARGET_HEIGHT", default_value_t = 2_000)]
    pub target_height: u64,

    /// Blocks the server tip advances per report.
    #[arg(long, env = "HASHCHAIN_SERVER_GROWTH", default_value_t = 25)]
    pub server_growth: u64,

    /// Maximum headers the fetcher appends per tick.
    #[arg(long, env = "HASHCHAIN_BATCH_SIZE", default_value_t = 50)]
    pub batch_size: u64,

    /// Milliseconds between fetcher and reporter ticks.
    #[arg(long, env = "HASHCHAIN_TICK_MS", default_value_t = 10)]
    pub tick_ms: u64,

    /// Chance per fetch that the last few headers get reorganized away.
    #[arg(long, env = "HASHCHAIN_REORG_PROBABILITY", default_value_t = 0.05)]
    pub reorg_probability: f64,

    /// Deepest reorg the fetcher will simulate.
    #[arg(long, env = "HASHCHAIN_MAX_REORG_DEPTH", default_value_t = 3)]
    pub max_reorg_depth: u64,

    /// Seed for the reorg generator, so runs are reproducible.
    #[arg(long, env = "HASHCHAIN_SEED", default_value_t = 42)]
    pub seed: u64,

    /// Default log filter when `RUST_LOG` is not set.
    #[arg(long, env = "HASHCHAIN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "HASHCHAIN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl RunArgs {
    /// Rejects combinations the simulator cannot make progress with.
    pub fn validate(&self) -> Result<()> {
        if self.target_height < self.start_server_height {
            bail!(
                "target height {} is below start server height {}",
                self.target_height,
                self.start_server_height
            );
        }
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if self.tick_ms == 0 {
            bail!("tick interval must be at least 1ms");
        }
        if self.server_growth == 0 && self.target_height > self.start_server_height {
            bail!("server growth of 0 never reaches the target height");
        }
        if !(0.0..=1.0).contains(&self.reorg_probability) {
            bail!(
                "reorg probability must be within [0, 1], got {}",
                self.reorg_probability
            );
        }
        Ok(())
    }
}
