// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Hashchain Monitor
//!
//! Entry point for the `hashchain-monitor` binary. Parses CLI arguments,
//! initializes logging, runs a simulated header sync against one shared
//! chain index, and prints the final status as JSON on stdout.
//!
//! - `run`     — simulate a sync session
//! - `version` — print build version information

mod cli;
mod logging;
mod sim;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Commands, MonitorCli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MonitorCli::parse();

    match cli.command {
        Commands::Run(args) => run_session(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Validates arguments, runs the simulator and prints the final status.
async fn run_session(args: cli::RunArgs) -> Result<()> {
    args.validate().context("invalid run arguments")?;
    logging::init_logging(&args.log_level, args.log_format);

    tracing::info!(
        batch_size = args.batch_size,
        tick_ms = args.tick_ms,
        reorg_probability = args.reorg_probability,
        seed = args.seed,
        "starting hashchain-monitor"
    );

    let status = sim::run(&args).await?;
    let json = serde_json::to_string_pretty(&status).context("failed to encode final status")?;
    println!("{}", json);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("hashchain-monitor {}", env!("CARGO_PKG_VERSION"));
    println!("rustc             {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}
