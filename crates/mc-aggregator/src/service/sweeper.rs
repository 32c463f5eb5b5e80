//! Background task that resolves groups past their deadline.

use crate::domain::config::duration_millis;
use crate::ports::inbound::AggregatorApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Periodically calls [`AggregatorApi::sweep_expired`].
///
/// Lateness is bounded by one interval. A sweep that finds a key locked
/// leaves it for the next tick.
pub struct ExpirySweeper<A> {
    api: Arc<A>,
    interval: Duration,
}

impl<A: AggregatorApi + 'static> ExpirySweeper<A> {
    pub fn new(api: Arc<A>, interval: Duration) -> Self {
        Self { api, interval }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = duration_millis(self.interval), "Expiry sweeper started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.api.sweep_expired().await;
                    if report.paused {
                        debug!("Sweep skipped, sweeper paused");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Expiry sweeper stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
