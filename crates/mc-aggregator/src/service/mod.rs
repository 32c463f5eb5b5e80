//! # Aggregator Service
//!
//! The application service implementing `AggregatorApi`.
//!
//! ## Flow
//!
//! ```text
//! submit ─→ dedup ─→ resolve key ─→ lock(key) ─→ load-or-create ─→ append
//!                                                                    │
//!                       ┌──────────────── release chain ─────────────┘
//!                       ↓                      ↓                     ↓
//!                   continue           release: process,        discard:
//!                  (unlock)            remove, emit             remove, discard
//! ```
//!
//! Acknowledgement events stop after `lock(key)`: they take the members they
//! settle out of the group and go to the discard path without being appended.
//! Members a release did not consume start a fresh group under the same lock.
//!
//! The sweeper and the control bus reuse the same lock registry and the same
//! evaluation path with the forced deadline flag set.
//!
//! ## Dispatch
//!
//! Outputs are dispatched after the group is removed and before the key is
//! unlocked, so results for one key leave in resolution order. An output that
//! cannot be delivered at that point is lost to this process: it is logged at
//! error level and raised on the dead-letter topic.

mod api;
mod control;
mod sweeper;
#[cfg(test)]
mod tests;
mod worker_pool;

pub use control::{ControlBus, ControlCommand, ControlParseError, ControlReply};
pub use sweeper::ExpirySweeper;
pub use worker_pool::{PoolReport, WorkerPool};

use crate::adapters::dedup::InMemoryDedupStore;
use crate::adapters::lock::{KeyGuard, KeyedLockRegistry};
use crate::adapters::memory_store::InMemoryGroupStore;
use crate::adapters::time::SystemTimeSource;
use crate::domain::config::AggregatorConfig;
use crate::domain::acknowledge::{AcknowledgementRule, ReceivedSettlesWaiting};
use crate::domain::correlation::{CorrelationKey, CorrelationKeyResolver, MessageEventResolver};
use crate::domain::errors::{LockError, StoreError};
use crate::domain::expiry::ExpiryPolicy;
use crate::domain::group::MessageGroup;
use crate::domain::processor::{Consolidated, GroupProcessorChain};
use crate::domain::release::{ReleaseContext, ReleaseDecision, ReleaseStrategyChain};
use crate::ports::inbound::SubmitOutcome;
use crate::ports::outbound::{DedupStore, Dispatcher, MessageGroupStore, TimeSource};
use shared_bus::{DiscardNotice, DiscardReason};
use shared_types::{Message, MessageId, Timestamp};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// The pluggable policies of one aggregator, fixed at construction.
pub struct AggregationPipeline {
    /// Derives correlation keys.
    pub resolver: Box<dyn CorrelationKeyResolver>,
    /// Decides when groups are released or discarded.
    pub release: ReleaseStrategyChain,
    /// Builds the consolidated output of released groups.
    pub processors: GroupProcessorChain,
    /// Computes group deadlines.
    pub expiry: Box<dyn ExpiryPolicy>,
    /// Recognises events that settle members instead of joining a group.
    pub acknowledgement: Option<Box<dyn AcknowledgementRule>>,
}

impl AggregationPipeline {
    /// Assemble a pipeline. The expiry policy comes from `config`.
    pub fn new(
        resolver: impl CorrelationKeyResolver + 'static,
        release: ReleaseStrategyChain,
        processors: GroupProcessorChain,
        config: &AggregatorConfig,
    ) -> Self {
        Self {
            resolver: Box::new(resolver),
            release,
            processors,
            expiry: config.expiry_policy(),
            acknowledgement: None,
        }
    }

    /// The message connector pipeline.
    pub fn message_connector(config: &AggregatorConfig) -> Self {
        Self::new(
            MessageEventResolver,
            ReleaseStrategyChain::message_connector(),
            GroupProcessorChain::message_connector(),
            config,
        )
        .with_acknowledgement(ReceivedSettlesWaiting)
    }

    /// Replace the expiry policy.
    pub fn with_expiry(mut self, policy: impl ExpiryPolicy + 'static) -> Self {
        self.expiry = Box::new(policy);
        self
    }

    /// Handle acknowledgement events with `rule`.
    pub fn with_acknowledgement(mut self, rule: impl AcknowledgementRule + 'static) -> Self {
        self.acknowledgement = Some(Box::new(rule));
        self
    }
}

/// Dependencies for `AggregatorService`.
pub struct AggregatorDependencies<S, D, T, X> {
    pub store: S,
    pub dedup: D,
    pub time_source: T,
    pub dispatcher: X,
}

impl<X> AggregatorDependencies<InMemoryGroupStore, InMemoryDedupStore, SystemTimeSource, X> {
    /// In-memory stores and the wall clock.
    pub fn in_memory(config: &AggregatorConfig, dispatcher: X) -> Self {
        Self {
            store: InMemoryGroupStore::new(config.max_pending_groups),
            dedup: InMemoryDedupStore::new(config.dedup_retention),
            time_source: SystemTimeSource,
            dispatcher,
        }
    }
}

impl<S, D, X> AggregatorDependencies<S, D, SystemTimeSource, X> {
    /// Swap the clock (tests drive a manual one).
    pub fn with_time_source<T: TimeSource>(self, time_source: T) -> AggregatorDependencies<S, D, T, X> {
        AggregatorDependencies {
            store: self.store,
            dedup: self.dedup,
            time_source,
            dispatcher: self.dispatcher,
        }
    }
}

#[derive(Default)]
struct Counters {
    released: AtomicU64,
    discarded: AtomicU64,
    dispatch_failures: AtomicU64,
}

/// What the critical section decided, before anything is dispatched.
enum Resolution {
    Pending {
        key: CorrelationKey,
        members: usize,
    },
    Released {
        key: CorrelationKey,
        output: Message,
        /// Unconsumed members that could not be buffered again.
        spilled: Option<DiscardNotice>,
    },
    Discarded(DiscardNotice),
}

/// The aggregation engine.
pub struct AggregatorService<S, D, T, X>
where
    S: MessageGroupStore,
    D: DedupStore,
    T: TimeSource,
    X: Dispatcher,
{
    config: AggregatorConfig,
    pipeline: AggregationPipeline,
    locks: KeyedLockRegistry,
    store: S,
    dedup: D,
    time_source: T,
    dispatcher: X,
    running: AtomicBool,
    sweeper_paused: AtomicBool,
    counters: Counters,
}

impl<S, D, T, X> AggregatorService<S, D, T, X>
where
    S: MessageGroupStore,
    D: DedupStore,
    T: TimeSource,
    X: Dispatcher,
{
    /// Create a running service.
    pub fn new(
        config: AggregatorConfig,
        pipeline: AggregationPipeline,
        deps: AggregatorDependencies<S, D, T, X>,
    ) -> Self {
        info!(
            release_chain = ?pipeline.release.names(),
            processor_chain = ?pipeline.processors.names(),
            acknowledgement = pipeline.acknowledgement.as_ref().map(|rule| rule.name()),
            max_pending_groups = config.max_pending_groups,
            "Aggregator created"
        );
        Self {
            config,
            pipeline,
            locks: KeyedLockRegistry::new(),
            store: deps.store,
            dedup: deps.dedup,
            time_source: deps.time_source,
            dispatcher: deps.dispatcher,
            running: AtomicBool::new(true),
            sweeper_paused: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// The configuration this service runs with.
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_sweeper_paused(&self) -> bool {
        self.sweeper_paused.load(Ordering::SeqCst)
    }

    /// Acquire a key lock, honouring the configured caller timeout.
    async fn lock(&self, key: &CorrelationKey) -> Result<KeyGuard, LockError> {
        match self.config.lock_timeout {
            Some(timeout) => self.locks.acquire_timeout(key, timeout).await,
            None => Ok(self.locks.acquire(key).await),
        }
    }

    /// Critical section of `submit`. Must run under `guard`.
    fn append_and_decide(&self, guard: &KeyGuard, message: Message, now: Timestamp) -> Resolution {
        let key = guard.key();

        if let Some(rule) = &self.pipeline.acknowledgement {
            let current = self.store.get(guard);
            if let Some(settled) = rule.settles(&message, current.as_ref()) {
                return self.acknowledge(guard, message, &settled);
            }
        }

        if let Err(e) = self
            .store
            .load_or_create(guard, &message, self.pipeline.expiry.as_ref(), now)
        {
            warn!(correlation_key = %key, message_id = %message.id(), error = %e, "Group not created");
            return Resolution::Discarded(
                DiscardNotice::single(store_discard_reason(&e), message)
                    .with_correlation_key(key.as_str())
                    .with_detail(e.to_string()),
            );
        }

        let group = match self.store.append(guard, message.clone(), now) {
            Ok(group) => group,
            Err(e) => {
                error!(correlation_key = %key, error = %e, "Append failed under lock");
                return Resolution::Discarded(
                    DiscardNotice::single(store_discard_reason(&e), message)
                        .with_correlation_key(key.as_str())
                        .with_detail(e.to_string()),
                );
            }
        };
        debug!(correlation_key = %key, members = group.len(), "Message appended");

        self.evaluate(guard, group, ReleaseContext::live(now))
    }

    /// Run the release chain over `group` and apply its decision. Must run
    /// under `guard`.
    fn evaluate(&self, guard: &KeyGuard, group: MessageGroup, ctx: ReleaseContext) -> Resolution {
        match (self.pipeline.release.decide(&group, &ctx), ctx.deadline_passed) {
            (ReleaseDecision::Continue, false) => Resolution::Pending {
                key: group.key().clone(),
                members: group.len(),
            },
            (ReleaseDecision::Release, _) => self.release(guard, group, ctx.now),
            (ReleaseDecision::Discard, false) => self.discard_group(guard, group, DiscardReason::Rejected),
            (_, true) => self.discard_group(guard, group, DiscardReason::ExpiredUnmatched),
        }
    }

    /// Settle members with an acknowledgement. Must run under `guard`.
    fn acknowledge(&self, guard: &KeyGuard, message: Message, settled: &[MessageId]) -> Resolution {
        let key = guard.key();
        let mut members = self.store.take_members(guard, settled);
        debug!(correlation_key = %key, message_id = %message.id(), settled = members.len(), "Acknowledgement settled members");
        members.push(message);
        Resolution::Discarded(DiscardNotice::group(
            DiscardReason::Acknowledged,
            key.to_string(),
            members,
        ))
    }

    fn release(&self, guard: &KeyGuard, group: MessageGroup, now: Timestamp) -> Resolution {
        let processed = self.pipeline.processors.consolidate(&group);
        // Removed whatever the processing result: a released group never returns
        let removed = self.store.remove(guard).unwrap_or(group);
        let key = removed.key().clone();

        match processed {
            Ok(consolidated) => {
                let leftovers: Vec<Message> = removed
                    .into_members()
                    .into_iter()
                    .filter(|m| !consolidated.consumes(m))
                    .collect();
                let Consolidated { message, .. } = consolidated;
                Resolution::Released {
                    spilled: self.rebuffer(guard, leftovers, now),
                    key,
                    output: message,
                }
            }
            Err(e) => {
                error!(correlation_key = %key, members = removed.len(), error = %e, "Released group could not be processed");
                Resolution::Discarded(
                    DiscardNotice::group(DiscardReason::ProcessingFailed, key.to_string(), removed.into_members())
                        .with_detail(e.to_string()),
                )
            }
        }
    }

    /// Start a new group from members a release left unconsumed. Must run
    /// under `guard`. Returns the members that could not be buffered.
    fn rebuffer(&self, guard: &KeyGuard, leftovers: Vec<Message>, now: Timestamp) -> Option<DiscardNotice> {
        let key = guard.key();
        let first = leftovers.first()?;

        if let Err(e) = self
            .store
            .load_or_create(guard, first, self.pipeline.expiry.as_ref(), now)
        {
            warn!(correlation_key = %key, members = leftovers.len(), error = %e, "Unconsumed members not buffered");
            return Some(
                DiscardNotice::group(store_discard_reason(&e), key.to_string(), leftovers)
                    .with_detail(e.to_string()),
            );
        }

        let mut spilled = Vec::new();
        let mut last_error = None;
        for message in leftovers {
            if let Err(e) = self.store.append(guard, message.clone(), now) {
                error!(correlation_key = %key, message_id = %message.id(), error = %e, "Append failed under lock");
                last_error = Some(e);
                spilled.push(message);
            }
        }
        debug!(correlation_key = %key, spilled = spilled.len(), "Unconsumed members buffered in a new group");

        last_error.map(|e| {
            DiscardNotice::group(store_discard_reason(&e), key.to_string(), spilled)
                .with_detail(e.to_string())
        })
    }

    fn discard_group(&self, guard: &KeyGuard, group: MessageGroup, reason: DiscardReason) -> Resolution {
        let removed = self.store.remove(guard).unwrap_or(group);
        warn!(correlation_key = %removed.key(), members = removed.len(), reason = %reason, "Group discarded");
        Resolution::Discarded(DiscardNotice::group(
            reason,
            removed.key().to_string(),
            removed.into_members(),
        ))
    }

    /// Dispatch a resolution, then unlock.
    async fn deliver(&self, resolution: Resolution, guard: KeyGuard) -> SubmitOutcome {
        let outcome = match resolution {
            Resolution::Pending { key, members } => SubmitOutcome::Pending {
                correlation_key: key,
                members,
            },
            Resolution::Released {
                key,
                output,
                spilled,
            } => {
                let outcome = self.emit(key, output).await;
                if let Some(notice) = spilled {
                    self.discard(notice).await;
                }
                outcome
            }
            Resolution::Discarded(notice) => self.discard(notice).await,
        };
        drop(guard);
        outcome
    }

    async fn emit(&self, key: CorrelationKey, output: Message) -> SubmitOutcome {
        match self.dispatcher.emit(&key, output.clone()).await {
            Ok(()) => {
                self.counters.released.fetch_add(1, Ordering::Relaxed);
                info!(correlation_key = %key, message_id = %output.id(), "Group released");
                SubmitOutcome::Released {
                    correlation_key: key,
                }
            }
            Err(e) => {
                self.counters.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                if let Err(alert) = self.dispatcher.dead_letter(&key, output, &e).await {
                    error!(correlation_key = %key, error = %alert, "Dead-letter alert failed");
                }
                SubmitOutcome::DispatchFailed {
                    correlation_key: key,
                }
            }
        }
    }

    async fn discard(&self, notice: DiscardNotice) -> SubmitOutcome {
        let reason = notice.reason;
        let correlation_key = notice.correlation_key.clone().map(CorrelationKey::new);
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.dispatcher.discard(notice).await {
            error!(reason = %reason, error = %e, "Discard could not be delivered");
        }
        SubmitOutcome::Discarded {
            reason,
            correlation_key,
        }
    }

    /// Forced resolution of the locked key's group, when it exists.
    async fn resolve_forced(&self, guard: KeyGuard, require_expired: bool) -> Option<SubmitOutcome> {
        let group = self.store.get(&guard)?;
        let now = self.time_source.now();

        // The group may have been replaced by a fresh one since it was listed
        if require_expired && !group.is_expired(now) {
            return None;
        }

        let resolution = self.evaluate(&guard, group, ReleaseContext::forced(now));
        Some(self.deliver(resolution, guard).await)
    }
}

fn store_discard_reason(error: &StoreError) -> DiscardReason {
    match error {
        StoreError::CapacityExceeded { .. } => DiscardReason::CapacityExceeded,
        StoreError::GroupNotFound { .. } => DiscardReason::ProcessingFailed,
    }
}
