//! Command line and environment configuration.

use anyhow::{ensure, Result};
use clap::{Parser, ValueEnum};
use mc_aggregator::{
    AggregationPipeline, AggregatorConfig, ExpectedCountReleaseStrategy, GroupProcessorChain,
    HeaderAttributeResolver, PartialReleaseOnExpiryStrategy, ReleaseStrategyChain,
};
use shared_bus::{InMemoryEventBus, DEFAULT_CHANNEL_CAPACITY};
use shared_types::header_names;
use std::time::Duration;

/// Which correlation and release rules to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PipelineKind {
    /// Business message events: correlate on app and message name, release
    /// when a sender meets a start or waiting subscription.
    MessageConnector,
    /// Correlate on `correlationId`, release after `--expected-count` members
    /// and emit every member payload.
    Merged,
}

/// Message Correlator: correlates message events into consolidated results.
#[derive(Parser, Debug)]
#[command(name = "mc-runtime")]
#[command(about = "Correlates JSON-lines message events read from stdin")]
pub struct Args {
    /// How long processed message ids are remembered, in milliseconds
    #[arg(long, env = "MC_DEDUP_RETENTION_MS", default_value_t = 600_000)]
    pub dedup_retention_ms: u64,

    /// Default group expiry, in milliseconds
    #[arg(long, env = "MC_GROUP_TIMEOUT_MS", default_value_t = 30_000)]
    pub group_timeout_ms: u64,

    /// Header carrying a per-group expiry override, in milliseconds
    #[arg(long, env = "MC_GROUP_TIMEOUT_HEADER")]
    pub group_timeout_header: Option<String>,

    /// Maximum concurrent submissions
    #[arg(long, env = "MC_WORKERS", default_value_t = 8)]
    pub workers: usize,

    /// Delay between expiry sweeps, in milliseconds
    #[arg(long, env = "MC_SWEEP_INTERVAL_MS", default_value_t = 1_000)]
    pub sweep_interval_ms: u64,

    /// Give up waiting for a key lock after this many milliseconds
    #[arg(long, env = "MC_LOCK_TIMEOUT_MS")]
    pub lock_timeout_ms: Option<u64>,

    /// Maximum number of live groups
    #[arg(long, env = "MC_MAX_PENDING_GROUPS", default_value_t = 10_000)]
    pub max_pending_groups: usize,

    /// Correlation and release rules
    #[arg(long, env = "MC_PIPELINE", value_enum, default_value_t = PipelineKind::MessageConnector)]
    pub pipeline: PipelineKind,

    /// Members that complete a group (merged pipeline)
    #[arg(long, env = "MC_EXPECTED_COUNT", default_value_t = 2)]
    pub expected_count: usize,

    /// Release expired groups holding at least this many members instead of
    /// discarding them (merged pipeline)
    #[arg(long, env = "MC_PARTIAL_RELEASE_MIN")]
    pub partial_release_min: Option<usize>,

    /// Events buffered per output subscriber before publishing waits
    #[arg(long, env = "MC_BUS_CAPACITY", default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub bus_capacity: usize,

    /// Give up publishing to a subscriber that does not drain after this many
    /// milliseconds; the output goes to the dead-letter path
    #[arg(long, env = "MC_PUBLISH_TIMEOUT_MS", default_value_t = 5_000)]
    pub publish_timeout_ms: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "MC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Engine configuration described by these arguments.
    pub fn aggregator_config(&self) -> AggregatorConfig {
        let mut config = AggregatorConfig::new()
            .with_dedup_retention(Duration::from_millis(self.dedup_retention_ms))
            .with_group_timeout(Duration::from_millis(self.group_timeout_ms))
            .with_worker_pool_size(self.workers)
            .with_sweep_interval(Duration::from_millis(self.sweep_interval_ms))
            .with_max_pending_groups(self.max_pending_groups);

        if let Some(header) = &self.group_timeout_header {
            config = config.with_group_timeout_header(header.clone());
        }
        if let Some(timeout) = self.lock_timeout_ms {
            config = config.with_lock_timeout(Duration::from_millis(timeout));
        }
        config
    }

    /// Outbound event bus sized by `--bus-capacity`.
    pub fn event_bus(&self) -> Result<InMemoryEventBus> {
        ensure!(self.bus_capacity > 0, "bus_capacity must be greater than zero");
        ensure!(self.publish_timeout_ms > 0, "publish_timeout_ms must be greater than zero");
        Ok(InMemoryEventBus::with_capacity(self.bus_capacity)
            .with_publish_timeout(Duration::from_millis(self.publish_timeout_ms)))
    }

    /// Pipeline selected by `--pipeline`.
    pub fn pipeline(&self, config: &AggregatorConfig) -> AggregationPipeline {
        match self.pipeline {
            PipelineKind::MessageConnector => AggregationPipeline::message_connector(config),
            PipelineKind::Merged => {
                let first = ReleaseStrategyChain::first(ExpectedCountReleaseStrategy::new(self.expected_count));
                let release = match self.partial_release_min {
                    Some(min) => first.then(PartialReleaseOnExpiryStrategy::new(min)),
                    None => first,
                };
                AggregationPipeline::new(
                    HeaderAttributeResolver::new(header_names::CORRELATION_ID),
                    release.build(),
                    GroupProcessorChain::merged(),
                    config,
                )
            }
        }
    }
}
