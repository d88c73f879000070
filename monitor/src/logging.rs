//! # Structured Logging
//!
//! Sets up `tracing-subscriber` for the simulator. The two library targets
//! worth filtering on are `hashchain_index`, which logs every append at
//! `trace`, reorg replacements and server tip moves at `debug`, and a stale
//! tip at `warn`; and `hashchain_monitor`, which logs progress deciles and
//! simulated reorgs at `info` and every observed property change at `debug`.
//!
//! Output goes to stderr. Stdout carries only the final JSON status, so
//! `hashchain-monitor run > status.json` keeps working at any log level.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, colored output.
    Pretty,
    /// JSON lines for log aggregation.
    Json,
}

/// Installs the global subscriber. Call once, before the session starts.
///
/// `default_level` is used when `RUST_LOG` is unset. Typical values:
///
/// ```text
/// info
/// hashchain_monitor=info,hashchain_index=debug
/// hashchain_index=trace
/// ```
pub fn init_logging(default_level: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
                .init();
        }
    }

    tracing::debug!("logging initialized (format={:?})", format);
}
