//! # Event Publisher
//!
//! Events fan out over a `tokio::sync::broadcast` channel and every receiver
//! filters locally. Alongside the channel the bus counts live subscriptions
//! per topic, so a publish that no filter would accept is reported to the
//! caller instead of disappearing silently.
//!
//! A broadcast channel overwrites the oldest event once a receiver falls
//! `capacity` events behind. The bus never lets that happen: a publish waits
//! until every receiver has room, for at most the publish timeout, and
//! otherwise fails with [`PublishError::Backpressure`] without sending.

use crate::events::{BusEvent, EventFilter, EventTopic};
use crate::subscriber::{EventStream, EventSubscriber, Subscription, TopicRegistry};
use crate::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_PUBLISH_TIMEOUT};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{timeout_at, Instant};
use tracing::{trace, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// No live subscription covers the event's topic.
    #[error("no subscriber covers topic {topic:?}")]
    NoSubscribers { topic: EventTopic },

    /// A receiver stayed `capacity` events behind for the whole publish timeout.
    #[error("subscribers did not drain within {waited_ms}ms, event on topic {topic:?} not sent")]
    Backpressure { topic: EventTopic, waited_ms: u64 },
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Hand `event` to every subscriber. Returns how many receivers got it.
    ///
    /// # Errors
    ///
    /// `PublishError::NoSubscribers` when no subscription covers the topic,
    /// `PublishError::Backpressure` when a receiver stays full for too long.
    async fn publish(&self, event: BusEvent) -> Result<usize, PublishError>;

    /// Publish attempts so far, delivered or not.
    fn events_published(&self) -> u64;
}

/// Single-process bus backed by a broadcast channel.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<BusEvent>,
    topics: Arc<TopicRegistry>,
    /// One publisher at a time checks for room and sends.
    send_lock: Mutex<()>,
    attempts: AtomicU64,
    undelivered: AtomicU64,
    capacity: usize,
    /// Slots the channel really has: `capacity` rounded up to a power of two.
    slots: usize,
    publish_timeout: Duration,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Buffer `capacity` events per receiver; publishers wait on slower ones.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            topics: Arc::new(TopicRegistry::default()),
            send_lock: Mutex::new(()),
            attempts: AtomicU64::new(0),
            undelivered: AtomicU64::new(0),
            capacity,
            slots: capacity.next_power_of_two(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    /// How long a publish waits for a full receiver before giving up.
    #[must_use]
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Subscribe and wrap the subscription as a `Stream`.
    #[must_use]
    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        EventStream::new(self.subscribe(filter))
    }

    /// Live receivers, whatever their filter.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Live subscriptions whose filter covers `topic`.
    #[must_use]
    pub fn subscribers_for(&self, topic: EventTopic) -> usize {
        self.topics.covering(topic)
    }

    /// Publishes that were not sent: nobody covered the topic or a receiver
    /// stayed full.
    #[must_use]
    pub fn undelivered(&self) -> u64 {
        self.undelivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    /// Wait until every receiver has a free slot, or until `deadline`.
    async fn wait_for_room(&self, deadline: Instant) -> bool {
        loop {
            let drained = self.topics.drained();
            tokio::pin!(drained);
            // Registered before the check so a receiver draining in between still wakes us
            drained.as_mut().enable();

            if self.sender.len() < self.slots {
                return true;
            }
            if timeout_at(deadline, drained).await.is_err() {
                return false;
            }
        }
    }

    fn refuse(&self, topic: EventTopic) -> PublishError {
        self.undelivered.fetch_add(1, Ordering::Relaxed);
        warn!(?topic, "Event dropped, no subscriber covers its topic");
        PublishError::NoSubscribers { topic }
    }

    fn stall(&self, topic: EventTopic) -> PublishError {
        self.undelivered.fetch_add(1, Ordering::Relaxed);
        let waited_ms = u64::try_from(self.publish_timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(?topic, waited_ms, queued = self.sender.len(), "Event not sent, subscribers are not draining");
        PublishError::Backpressure { topic, waited_ms }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubscriber for InMemoryEventBus {
    fn subscribe(&self, filter: EventFilter) -> Subscription {
        let registration = TopicRegistry::register(&self.topics, filter.covered_topics());
        Subscription::new(self.sender.subscribe(), filter, registration)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: BusEvent) -> Result<usize, PublishError> {
        let topic = event.topic();
        self.attempts.fetch_add(1, Ordering::Relaxed);

        if self.topics.covering(topic) == 0 {
            return Err(self.refuse(topic));
        }

        let deadline = Instant::now() + self.publish_timeout;
        let Ok(_turn) = timeout_at(deadline, self.send_lock.lock()).await else {
            return Err(self.stall(topic));
        };
        if !self.wait_for_room(deadline).await {
            return Err(self.stall(topic));
        }

        let receivers = self.sender.send(event).map_err(|_| self.refuse(topic))?;
        trace!(?topic, receivers, "Event published");
        Ok(receivers)
    }

    fn events_published(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}
