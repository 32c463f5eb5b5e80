//! # Event Subscriber
//!
//! A subscription owns a broadcast receiver plus an [`EventFilter`] and only
//! surfaces events the filter accepts. It can be polled directly
//! ([`Subscription::recv`]) or turned into an [`EventStream`].
//!
//! Each subscription also holds a registration in the bus's topic registry,
//! released on drop, which is what lets the publisher tell whether anybody
//! covers a topic. The registry also wakes publishers waiting for room in the
//! channel whenever a receiver takes an event or goes away.

use crate::events::{BusEvent, EventFilter, EventTopic};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Every sender is gone.
    #[error("event bus closed")]
    Closed,
}

pub trait EventSubscriber: Send + Sync {
    fn subscribe(&self, filter: EventFilter) -> Subscription;
}

/// Live subscription counts per topic. `EventTopic::All` counts wildcards.
#[derive(Debug, Default)]
pub(crate) struct TopicRegistry {
    counts: Mutex<HashMap<EventTopic, usize>>,
    drained: Notify,
}

impl TopicRegistry {
    pub(crate) fn register(registry: &Arc<Self>, topics: Vec<EventTopic>) -> Registration {
        let mut counts = registry.counts.lock();
        for topic in &topics {
            *counts.entry(*topic).or_default() += 1;
        }
        debug!(?topics, "Subscription registered");
        Registration {
            registry: Arc::clone(registry),
            topics,
        }
    }

    /// Subscriptions that would accept an event on `topic`.
    pub(crate) fn covering(&self, topic: EventTopic) -> usize {
        let counts = self.counts.lock();
        let wildcard = counts.get(&EventTopic::All).copied().unwrap_or(0);
        if topic == EventTopic::All {
            return counts.values().sum();
        }
        wildcard + counts.get(&topic).copied().unwrap_or(0)
    }

    /// Resolves on the next [`notify_drained`](Self::notify_drained) after it
    /// is enabled or first polled.
    pub(crate) fn drained(&self) -> Notified<'_> {
        self.drained.notified()
    }

    pub(crate) fn notify_drained(&self) {
        self.drained.notify_waiters();
    }
}

/// Held by a subscription; unregisters its topics on drop.
pub(crate) struct Registration {
    registry: Arc<TopicRegistry>,
    topics: Vec<EventTopic>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut counts = self.registry.counts.lock();
        for topic in &self.topics {
            if let Some(count) = counts.get_mut(topic) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(topic);
                }
            }
        }
        drop(counts);
        // The receiver is dropped first and no longer holds slots
        self.registry.notify_drained();
    }
}

impl Registration {
    fn notify_drained(&self) {
        self.registry.notify_drained();
    }
}

/// Filtered receiver handle. Dropping it unsubscribes.
pub struct Subscription {
    receiver: broadcast::Receiver<BusEvent>,
    filter: EventFilter,
    registration: Registration,
}

impl Subscription {
    pub(crate) fn new(
        receiver: broadcast::Receiver<BusEvent>,
        filter: EventFilter,
        registration: Registration,
    ) -> Self {
        Self {
            receiver,
            filter,
            registration,
        }
    }

    /// Wait for the next accepted event. `None` once the bus is dropped.
    ///
    /// Lagging skips the overwritten events and keeps going.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            let next = self.receiver.recv().await;
            self.registration.notify_drained();
            match next {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "Subscriber fell behind"),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next accepted event already buffered, if any.
    ///
    /// # Errors
    ///
    /// `SubscriptionError::Closed` once the bus is dropped and the buffer drained.
    pub fn try_recv(&mut self) -> Result<Option<BusEvent>, SubscriptionError> {
        loop {
            let next = self.receiver.try_recv();
            if next.is_ok() {
                self.registration.notify_drained();
            }
            match next {
                Ok(event) if self.filter.matches(&event) => return Ok(Some(event)),
                Ok(_) => {}
                Err(TryRecvError::Lagged(missed)) => warn!(missed, "Subscriber fell behind"),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Closed) => return Err(SubscriptionError::Closed),
            }
        }
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

/// [`Subscription`] as a `tokio_stream::Stream`. Ends when the bus is dropped.
pub struct EventStream {
    inner: BroadcastStream<BusEvent>,
    filter: EventFilter,
    registration: Registration,
}

impl EventStream {
    #[must_use]
    pub fn new(subscription: Subscription) -> Self {
        Self {
            inner: BroadcastStream::new(subscription.receiver),
            filter: subscription.filter,
            registration: subscription.registration,
        }
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

impl Stream for EventStream {
    type Item = BusEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<BusEvent>> {
        let this = self.get_mut();
        while let Some(next) = std::task::ready!(Pin::new(&mut this.inner).poll_next(cx)) {
            this.registration.notify_drained();
            match next {
                Ok(event) if this.filter.matches(&event) => return Poll::Ready(Some(event)),
                Ok(_) => {}
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(missed, "Event stream fell behind");
                }
            }
        }
        Poll::Ready(None)
    }
}
