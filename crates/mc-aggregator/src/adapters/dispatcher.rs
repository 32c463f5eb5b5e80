//! # Dispatchers
//!
//! Outbound adapters publishing engine results.
//!
//! - `BusDispatcher` - publishes onto the shared event bus (resolved, discard
//!   and dead-letter topics)
//! - `ChannelDispatcher` - forwards onto an mpsc channel, for a single consumer

use crate::domain::correlation::CorrelationKey;
use crate::domain::errors::DispatchError;
use crate::ports::outbound::Dispatcher;
use async_trait::async_trait;
use shared_bus::{BusEvent, DiscardNotice, EventPublisher, PublishError, DLQ_TOPIC};
use shared_types::Message;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Dispatcher over an [`EventPublisher`].
pub struct BusDispatcher<P: EventPublisher> {
    publisher: Arc<P>,
}

impl<P: EventPublisher> BusDispatcher<P> {
    pub fn new(publisher: Arc<P>) -> Self {
        Self { publisher }
    }

    async fn publish(&self, event: BusEvent) -> Result<(), DispatchError> {
        self.publisher
            .publish(event)
            .await
            .map(|receivers| debug!(receivers, "Event dispatched"))
            .map_err(|e| match e {
                PublishError::NoSubscribers { topic } => DispatchError::NoSubscribers { topic },
                PublishError::Backpressure { topic, waited_ms } => {
                    DispatchError::Backpressure { topic, waited_ms }
                }
            })
    }
}

#[async_trait]
impl<P: EventPublisher> Dispatcher for BusDispatcher<P> {
    async fn emit(&self, key: &CorrelationKey, output: Message) -> Result<(), DispatchError> {
        self.publish(BusEvent::Resolved {
            correlation_key: key.to_string(),
            message: output,
        })
        .await
    }

    async fn discard(&self, notice: DiscardNotice) -> Result<(), DispatchError> {
        self.publish(BusEvent::Discarded(notice)).await
    }

    async fn dead_letter(
        &self,
        key: &CorrelationKey,
        output: Message,
        error: &DispatchError,
    ) -> Result<(), DispatchError> {
        log_lost_output(key, &output, error);
        self.publish(BusEvent::DispatchFailed {
            correlation_key: key.to_string(),
            message: output,
            error: error.to_string(),
        })
        .await
    }
}

/// Dispatcher over an mpsc channel.
#[derive(Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::Sender<BusEvent>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BusEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    async fn send(&self, event: BusEvent) -> Result<(), DispatchError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| DispatchError::Closed)
    }
}

#[async_trait]
impl Dispatcher for ChannelDispatcher {
    async fn emit(&self, key: &CorrelationKey, output: Message) -> Result<(), DispatchError> {
        self.send(BusEvent::Resolved {
            correlation_key: key.to_string(),
            message: output,
        })
        .await
    }

    async fn discard(&self, notice: DiscardNotice) -> Result<(), DispatchError> {
        self.send(BusEvent::Discarded(notice)).await
    }

    async fn dead_letter(
        &self,
        key: &CorrelationKey,
        output: Message,
        error: &DispatchError,
    ) -> Result<(), DispatchError> {
        log_lost_output(key, &output, error);
        self.send(BusEvent::DispatchFailed {
            correlation_key: key.to_string(),
            message: output,
            error: error.to_string(),
        })
        .await
    }
}

fn log_lost_output(key: &CorrelationKey, output: &Message, error: &DispatchError) {
    error!(
        topic = DLQ_TOPIC,
        correlation_key = %key,
        message_id = %output.id(),
        error = %error,
        "Released output lost after group removal"
    );
}
