//! # Message Correlator Runtime
//!
//! Runs the aggregation engine over a JSON-lines stream.
//!
//! ```text
//! stdin ──→ parse ──┬─→ WorkerPool ──→ AggregatorService ──→ Event Bus ──→ stdout
//!                   │                        ↑
//!                   └─→ ControlBus ──────────┤
//!                                            │
//!                          ExpirySweeper ────┘
//! ```
//!
//! ## Startup Sequence
//!
//! 1. Parse configuration (flags, then `MC_*` environment variables)
//! 2. Install logging (stderr, `RUST_LOG` overrides `--log-level`)
//! 3. Validate configuration
//! 4. Start the sweeper, the worker pool and the event printer
//! 5. Read input until EOF or Ctrl-C, then shut down gracefully

mod config;
mod runtime;
mod transport;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Args;
use crate::runtime::CorrelatorRuntime;

/// Logs go to stderr; stdout carries data.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!(e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = args.aggregator_config();
    config.validate().context("invalid configuration")?;
    info!(?config, pipeline = ?args.pipeline, "Configuration loaded");

    let pipeline = args.pipeline(&config);
    let bus = args.event_bus().context("invalid configuration")?;
    let runtime = CorrelatorRuntime::with_bus(config, pipeline, bus);
    runtime
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    Ok(())
}
