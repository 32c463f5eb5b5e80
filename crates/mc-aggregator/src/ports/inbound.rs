//! # Inbound Ports (Driving Ports)
//!
//! The primary API of the aggregation engine, used by transports and by the
//! control bus.

use crate::domain::correlation::CorrelationKey;
use crate::domain::errors::AggregatorError;
use crate::domain::group::GroupSnapshot;
use async_trait::async_trait;
use serde::Serialize;
use shared_bus::DiscardReason;
use shared_types::Message;

/// What happened to a submitted message (or to a group the sweeper resolved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum SubmitOutcome {
    /// Appended; the group keeps waiting.
    #[serde(rename_all = "camelCase")]
    Pending {
        correlation_key: CorrelationKey,
        members: usize,
    },

    /// The group was released and its output emitted.
    #[serde(rename_all = "camelCase")]
    Released { correlation_key: CorrelationKey },

    /// The message (or its group) went to the discard path.
    #[serde(rename_all = "camelCase")]
    Discarded {
        reason: DiscardReason,
        correlation_key: Option<CorrelationKey>,
    },

    /// The group was released but its output could not be delivered.
    #[serde(rename_all = "camelCase")]
    DispatchFailed { correlation_key: CorrelationKey },
}

impl SubmitOutcome {
    /// The discard reason, for discard outcomes.
    pub fn discard_reason(&self) -> Option<DiscardReason> {
        match self {
            Self::Discarded { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Whether a release happened.
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released { .. } | Self::DispatchFailed { .. })
    }
}

/// Operational counters reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorStatus {
    pub running: bool,
    pub sweeper_paused: bool,
    pub pending_groups: usize,
    pub dedup_records: usize,
    pub held_locks: usize,
    pub released: u64,
    pub discarded: u64,
    pub dispatch_failures: u64,
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Set when the sweep was skipped because the sweeper is paused.
    pub paused: bool,
    /// Expired groups released under forced evaluation.
    pub released: usize,
    /// Expired groups discarded.
    pub discarded: usize,
    /// Expired groups whose lock was busy; retried on the next sweep.
    pub deferred: usize,
    /// Lapsed dedup records removed.
    pub dedup_purged: usize,
}

impl SweepReport {
    /// Record the outcome of one forced resolution.
    pub fn record(&mut self, outcome: &SubmitOutcome) {
        if outcome.is_released() {
            self.released += 1;
        } else if outcome.discard_reason().is_some() {
            self.discarded += 1;
        }
    }

    /// Whether the sweep changed anything.
    pub fn is_idle(&self) -> bool {
        self.released == 0 && self.discarded == 0 && self.deferred == 0 && self.dedup_purged == 0
    }
}

/// Primary API of the aggregation engine.
#[async_trait]
pub trait AggregatorApi: Send + Sync {
    /// Run a message through dedup, correlation, grouping and release.
    ///
    /// # Errors
    ///
    /// - `Stopped`: the engine is stopped; the message was not consumed
    /// - `LockTimeout`: the key lock was not acquired in time; nothing was
    ///   appended and the message may be retried
    async fn submit(&self, message: Message) -> Result<SubmitOutcome, AggregatorError>;

    /// Current snapshot of a group, read under its lock.
    async fn inspect(&self, key: &CorrelationKey) -> Option<GroupSnapshot>;

    /// Resolve a group now, as if its deadline had passed.
    ///
    /// Returns `None` when no group exists for the key.
    async fn force_expire(&self, key: &CorrelationKey) -> Option<SubmitOutcome>;

    /// Resolve every expired group whose lock is free, and purge lapsed dedup
    /// records. Does nothing while the sweeper is paused.
    async fn sweep_expired(&self) -> SweepReport;

    /// Operational counters.
    fn status(&self) -> AggregatorStatus;

    /// Make `submit` fail fast with `Stopped`.
    fn stop(&self);

    /// Accept submissions again.
    fn start(&self);

    /// Suspend expiry sweeps.
    fn pause_sweeper(&self);

    /// Resume expiry sweeps.
    fn resume_sweeper(&self);
}
