//! `AggregatorApi` implementation.

use super::AggregatorService;
use crate::domain::correlation::{dedup_key, CorrelationKey};
use crate::domain::errors::AggregatorError;
use crate::domain::group::GroupSnapshot;
use crate::ports::inbound::{AggregatorApi, AggregatorStatus, SubmitOutcome, SweepReport};
use crate::ports::outbound::{DedupStore, Dispatcher, MessageGroupStore, TimeSource};
use async_trait::async_trait;
use shared_bus::{DiscardNotice, DiscardReason};
use shared_types::Message;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

#[async_trait]
impl<S, D, T, X> AggregatorApi for AggregatorService<S, D, T, X>
where
    S: MessageGroupStore,
    D: DedupStore,
    T: TimeSource,
    X: Dispatcher,
{
    async fn submit(&self, message: Message) -> Result<SubmitOutcome, AggregatorError> {
        if !self.is_running() {
            return Err(AggregatorError::Stopped);
        }

        let id = dedup_key(&message);
        if !self.dedup.admit(&id, self.time_source.now()) {
            debug!(dedup_key = %id, "Duplicate message");
            return Ok(self
                .discard(DiscardNotice::single(DiscardReason::Duplicate, message))
                .await);
        }
        // Until committed, the record is dropped again when this future is
        // cancelled or gives up: nothing was appended, so a redelivery must be admitted
        let admission = Admission::new(&self.dedup, id);

        let key = match self.pipeline.resolver.resolve(&message) {
            Ok(key) => key,
            Err(e) => {
                admission.commit();
                warn!(message_id = %message.id(), error = %e, "Message not correlated");
                return Ok(self
                    .discard(
                        DiscardNotice::single(DiscardReason::MissingCorrelationData, message)
                            .with_detail(e.to_string()),
                    )
                    .await);
            }
        };

        let guard = match self.lock(&key).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(correlation_key = %key, error = %e, "Submit gave up waiting for the key lock");
                return Err(e.into());
            }
        };

        // Read after acquiring: waiting for the lock may take a while
        let now = self.time_source.now();
        let resolution = self.append_and_decide(&guard, message, now);
        admission.commit();
        Ok(self.deliver(resolution, guard).await)
    }

    async fn inspect(&self, key: &CorrelationKey) -> Option<GroupSnapshot> {
        let guard = match self.lock(key).await {
            Ok(guard) => guard,
            Err(e) => {
                // Busy, not absent: the caller only sees `None`
                warn!(correlation_key = %key, error = %e, "Inspect gave up waiting for the key lock");
                return None;
            }
        };
        self.store.get(&guard).map(|group| group.snapshot())
    }

    async fn force_expire(&self, key: &CorrelationKey) -> Option<SubmitOutcome> {
        let guard = match self.lock(key).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(correlation_key = %key, error = %e, "Force expire gave up waiting for the key lock");
                return None;
            }
        };
        let outcome = self.resolve_forced(guard, false).await;
        info!(correlation_key = %key, outcome = ?outcome, "Group force-expired");
        outcome
    }

    async fn sweep_expired(&self) -> SweepReport {
        let mut report = SweepReport::default();
        if self.is_sweeper_paused() {
            report.paused = true;
            return report;
        }

        let now = self.time_source.now();
        report.dedup_purged = self.dedup.purge_expired(now);

        for key in self.store.list_expired(now) {
            let Some(guard) = self.locks.try_acquire(&key) else {
                // A submit holds the key; the group is evaluated on the next tick
                debug!(correlation_key = %key, "Expired group busy, deferred");
                report.deferred += 1;
                continue;
            };
            if let Some(outcome) = self.resolve_forced(guard, true).await {
                report.record(&outcome);
            }
        }

        if !report.is_idle() {
            debug!(
                released = report.released,
                discarded = report.discarded,
                deferred = report.deferred,
                dedup_purged = report.dedup_purged,
                "Sweep completed"
            );
        }
        report
    }

    fn status(&self) -> AggregatorStatus {
        AggregatorStatus {
            running: self.is_running(),
            sweeper_paused: self.is_sweeper_paused(),
            pending_groups: self.store.len(),
            dedup_records: self.dedup.len(),
            held_locks: self.locks.len(),
            released: self.counters.released.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            dispatch_failures: self.counters.dispatch_failures.load(Ordering::Relaxed),
        }
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Aggregator stopped");
        }
    }

    fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("Aggregator started");
        }
    }

    fn pause_sweeper(&self) {
        if !self.sweeper_paused.swap(true, Ordering::SeqCst) {
            info!("Expiry sweeper paused");
        }
    }

    fn resume_sweeper(&self) {
        if self.sweeper_paused.swap(false, Ordering::SeqCst) {
            info!("Expiry sweeper resumed");
        }
    }
}

/// A dedup record that is rolled back on drop unless committed.
struct Admission<'a, D: DedupStore> {
    dedup: &'a D,
    id: String,
    committed: bool,
}

impl<'a, D: DedupStore> Admission<'a, D> {
    fn new(dedup: &'a D, id: String) -> Self {
        Self {
            dedup,
            id,
            committed: false,
        }
    }

    /// The message reached a group or the discard path; keep the record.
    fn commit(mut self) {
        self.committed = true;
    }
}

impl<D: DedupStore> Drop for Admission<'_, D> {
    fn drop(&mut self) {
        if !self.committed {
            self.dedup.forget(&self.id);
            debug!(dedup_key = %self.id, "Admission rolled back");
        }
    }
}
