//! # Shared Bus - Outbound Event Bus
//!
//! Carries everything the aggregator emits to the outside world.
//!
//! ```text
//! ┌──────────────┐                      ┌──────────────────┐
//! │  Aggregator  │   publish()          │ resolved sink    │
//! │  Dispatcher  │ ──────┐        ┌───→ │ discard sink     │
//! └──────────────┘       ▼        │     │ alerting (DLQ)   │
//!                  ┌──────────────┐     └──────────────────┘
//!                  │  Event Bus   │ ─── subscribe(filter)
//!                  └──────────────┘
//! ```
//!
//! ## Topics
//!
//! - **Resolved:** one consolidated message per released group
//! - **Discard:** original messages (or group remnants) tagged with a reason code
//! - **Dead Letter Queue:** results lost after their group was already removed
//!
//! A publish on a topic no live subscription covers fails with
//! [`PublishError::NoSubscribers`]; one that finds a receiver still full
//! after the publish timeout fails with [`PublishError::Backpressure`]. The
//! dispatcher turns either into a dispatch failure.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{BusEvent, DiscardNotice, DiscardReason, EventFilter, EventTopic};
pub use publisher::{EventPublisher, InMemoryEventBus, PublishError};
pub use subscriber::{EventStream, EventSubscriber, Subscription, SubscriptionError};

use std::time::Duration;

/// Events buffered per receiver before publishers have to wait.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// How long a publish waits for a full receiver to drain.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Log target for results lost after their group was removed.
pub const DLQ_TOPIC: &str = "dlq.critical";
