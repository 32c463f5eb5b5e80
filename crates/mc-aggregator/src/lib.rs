//! # Message Aggregator
//!
//! Correlates independently produced message events into groups and releases
//! each group, once complete, as a single consolidated message.
//!
//! ## Architecture
//!
//! ```text
//! producers ──→ WorkerPool ──submit──→ ┐
//!                                      │   dedup → correlate → lock(key)
//! ExpirySweeper ──sweep_expired──────→ ├──→ AggregatorService
//!                                      │   group store → release chain
//! ControlBus ──force-expire/inspect──→ ┘   → processor chain
//!                                                  │
//!                                                  ↓
//!                                  Dispatcher (resolved / discard / DLQ)
//! ```
//!
//! ## Guarantees
//!
//! | Guarantee | Description |
//! |-----------|-------------|
//! | Per-key serialization | All mutations of one group happen under its key lock |
//! | Exactly-once admission | A message id is admitted once per retention window; a submit that is abandoned before appending gives it back |
//! | Single release | A released or discarded group never reappears under the same instance |
//! | Bounded lateness | Expired groups are resolved within one sweep interval |
//! | Bounded memory | New groups beyond `max_pending_groups` are discarded |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Correlation, groups, release and processor chains, config
//! - `ports/` - Port traits (inbound API, outbound SPI)
//! - `adapters/` - In-memory stores, key locks, clocks, dispatchers
//! - `service/` - Application service, sweeper, control bus, worker pool
//!
//! ## Usage
//!
//! ```ignore
//! use mc_aggregator::{
//!     AggregationPipeline, AggregatorApi, AggregatorConfig, AggregatorDependencies,
//!     AggregatorService, ChannelDispatcher,
//! };
//!
//! let config = AggregatorConfig::default();
//! let (dispatcher, mut results) = ChannelDispatcher::channel(1024);
//! let service = AggregatorService::new(
//!     config.clone(),
//!     AggregationPipeline::message_connector(&config),
//!     AggregatorDependencies::in_memory(&config, dispatcher),
//! );
//!
//! let outcome = service.submit(message).await?;
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

// Re-export key types for convenience
pub use adapters::dedup::InMemoryDedupStore;
pub use adapters::dispatcher::{BusDispatcher, ChannelDispatcher};
pub use adapters::lock::{KeyGuard, KeyedLockRegistry};
pub use adapters::memory_store::InMemoryGroupStore;
pub use adapters::time::{ManualTimeSource, SystemTimeSource};
pub use domain::acknowledge::{AcknowledgementRule, ReceivedSettlesWaiting};
pub use domain::config::AggregatorConfig;
pub use domain::correlation::{
    dedup_key, CorrelationKey, CorrelationKeyResolver, HeaderAttributeResolver,
    MessageEventResolver,
};
pub use domain::errors::{
    AggregatorError, ConfigError, CorrelationError, DispatchError, LockError, ProcessingError,
    StoreError,
};
pub use domain::expiry::{ExpiryPolicy, FixedExpiry, HeaderExpiry};
pub use domain::group::{GroupSnapshot, MessageGroup};
pub use domain::processor::{
    Consolidated, GroupProcessor, GroupProcessorChain, MergedMembersProcessor,
    OutboundHeadersProcessor, ProcessedOutput, ReceiveMessagePayloadProcessor,
    StartMessagePayloadProcessor,
};
pub use domain::release::{
    CancelledDiscardStrategy, ExpectedCountReleaseStrategy, MessageSentReleaseStrategy,
    PartialReleaseOnExpiryStrategy, ReleaseContext, ReleaseDecision, ReleaseStrategy,
    ReleaseStrategyChain, RequiredKindsReleaseStrategy,
};
pub use ports::inbound::{AggregatorApi, AggregatorStatus, SubmitOutcome, SweepReport};
pub use ports::outbound::{DedupStore, Dispatcher, MessageGroupStore, TimeSource};
pub use service::{
    AggregationPipeline, AggregatorDependencies, AggregatorService, ControlBus, ControlCommand,
    ControlParseError, ControlReply, ExpirySweeper, PoolReport, WorkerPool,
};
