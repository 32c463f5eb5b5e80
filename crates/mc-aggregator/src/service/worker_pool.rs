//! # Worker Pool
//!
//! Drains an inbound channel into [`AggregatorApi::submit`] with bounded
//! concurrency. Messages for different keys proceed in parallel; messages for
//! the same key serialize on the key lock inside `submit`.

use crate::domain::errors::AggregatorError;
use crate::ports::inbound::{AggregatorApi, SubmitOutcome};
use serde::Serialize;
use shared_types::Message;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Totals over the lifetime of one [`WorkerPool::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolReport {
    pub submitted: usize,
    pub pending: usize,
    pub released: usize,
    pub discarded: usize,
    /// Submissions refused with an error (stopped, lock timeout).
    pub rejected: usize,
    /// Workers that panicked or were cancelled.
    pub crashed: usize,
}

impl PoolReport {
    fn record(&mut self, result: Result<Result<SubmitOutcome, AggregatorError>, JoinError>) {
        match result {
            Ok(Ok(outcome)) if outcome.is_released() => self.released += 1,
            Ok(Ok(SubmitOutcome::Pending { .. })) => self.pending += 1,
            Ok(Ok(_)) => self.discarded += 1,
            Ok(Err(e)) => {
                warn!(error = %e, "Submission rejected");
                self.rejected += 1;
            }
            Err(e) => {
                error!(error = %e, "Worker crashed");
                self.crashed += 1;
            }
        }
    }
}

/// Bounded pool of `submit` workers.
pub struct WorkerPool<A> {
    api: Arc<A>,
    size: usize,
}

impl<A: AggregatorApi + 'static> WorkerPool<A> {
    /// At most `size` submissions run at once (minimum 1).
    pub fn new(api: Arc<A>, size: usize) -> Self {
        Self {
            api,
            size: size.max(1),
        }
    }

    /// Submit every message received until the channel closes, then wait for
    /// in-flight submissions.
    pub async fn run(self, mut inbound: mpsc::Receiver<Message>) -> PoolReport {
        info!(size = self.size, "Worker pool started");

        let semaphore = Arc::new(Semaphore::new(self.size));
        let mut workers = JoinSet::new();
        let mut report = PoolReport::default();

        while let Some(message) = inbound.recv().await {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            report.submitted += 1;

            let api = Arc::clone(&self.api);
            workers.spawn(async move {
                let _permit = permit;
                let message_id = message.id();
                let result = api.submit(message).await;
                debug!(%message_id, outcome = ?result, "Submission finished");
                result
            });

            while let Some(result) = workers.try_join_next() {
                report.record(result);
            }
        }

        while let Some(result) = workers.join_next().await {
            report.record(result);
        }

        info!(
            submitted = report.submitted,
            released = report.released,
            discarded = report.discarded,
            rejected = report.rejected,
            "Worker pool drained"
        );
        report
    }
}
