//! # Bus Events
//!
//! What the aggregator emits, and how subscribers select it.

use serde::{Deserialize, Serialize};
use shared_types::Message;
use std::fmt;

/// One outbound event, tagged on `event` when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BusEvent {
    /// A group was released and consolidated into one message.
    #[serde(rename_all = "camelCase")]
    Resolved {
        /// Correlation key of the released group.
        correlation_key: String,
        /// The consolidated output.
        message: Message,
    },

    /// Messages routed to the discard destination.
    Discarded(DiscardNotice),

    /// A consolidated output could not be delivered after its group was removed.
    ///
    /// The result is lost unless the transport can re-deliver it upstream.
    #[serde(rename_all = "camelCase")]
    DispatchFailed {
        /// Correlation key of the lost group.
        correlation_key: String,
        /// The output that could not be delivered.
        message: Message,
        /// Why delivery failed.
        error: String,
    },
}

impl BusEvent {
    /// Topic used for routing and subscription filters.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::Resolved { .. } => EventTopic::Resolved,
            Self::Discarded(_) => EventTopic::Discard,
            Self::DispatchFailed { .. } => EventTopic::DeadLetterQueue,
        }
    }

    /// The discard reason, for discard events.
    #[must_use]
    pub fn discard_reason(&self) -> Option<DiscardReason> {
        match self {
            Self::Discarded(notice) => Some(notice.reason),
            _ => None,
        }
    }

    /// The correlation key this event refers to, when one was resolved.
    #[must_use]
    pub fn correlation_key(&self) -> Option<&str> {
        match self {
            Self::Resolved {
                correlation_key, ..
            }
            | Self::DispatchFailed {
                correlation_key, ..
            } => Some(correlation_key),
            Self::Discarded(notice) => notice.correlation_key.as_deref(),
        }
    }
}

/// Reason code attached to every discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscardReason {
    /// The message id was already processed inside the retention window.
    Duplicate,
    /// No correlation key could be derived from the message headers.
    MissingCorrelationData,
    /// The group was released but no output could be produced.
    ProcessingFailed,
    /// The group expired and forced evaluation did not release it.
    ExpiredUnmatched,
    /// A release strategy decided to discard the group on the live path.
    Rejected,
    /// The group store was full and a new group could not be created.
    CapacityExceeded,
    /// An acknowledgement event, together with the members it settled.
    Acknowledged,
}

impl DiscardReason {
    /// The wire code for this reason.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::MissingCorrelationData => "missing-correlation-data",
            Self::ProcessingFailed => "processing-failed",
            Self::ExpiredUnmatched => "expired-unmatched",
            Self::Rejected => "rejected",
            Self::CapacityExceeded => "capacity-exceeded",
            Self::Acknowledged => "acknowledged",
        }
    }

    /// Whether operators should investigate this discard.
    #[must_use]
    pub fn requires_investigation(&self) -> bool {
        matches!(self, Self::ProcessingFailed)
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a discard event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardNotice {
    /// Why the messages were discarded.
    pub reason: DiscardReason,
    /// Correlation key, when one was resolved before the discard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
    /// The original message, or every member of the discarded group.
    pub messages: Vec<Message>,
    /// Extra context (e.g. the processing error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DiscardNotice {
    /// Discard a single message that never reached a group.
    #[must_use]
    pub fn single(reason: DiscardReason, message: Message) -> Self {
        Self {
            reason,
            correlation_key: None,
            messages: vec![message],
            detail: None,
        }
    }

    /// Discard the remnants of a group.
    #[must_use]
    pub fn group(reason: DiscardReason, correlation_key: String, messages: Vec<Message>) -> Self {
        Self {
            reason,
            correlation_key: Some(correlation_key),
            messages,
            detail: None,
        }
    }

    /// Attach a correlation key.
    #[must_use]
    pub fn with_correlation_key(mut self, key: impl Into<String>) -> Self {
        self.correlation_key = Some(key.into());
        self
    }

    /// Attach detail text.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Outbound destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Consolidated outputs.
    Resolved,
    /// Discarded messages.
    Discard,
    /// Dead Letter Queue for lost results.
    DeadLetterQueue,
    /// Wildcard, only meaningful in filters.
    All,
}

/// Selects which events a subscription surfaces.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Accepted topics; empty accepts every topic.
    pub topics: Vec<EventTopic>,
    /// Discard reasons to include. Empty means all reasons.
    pub discard_reasons: Vec<DiscardReason>,
}

impl EventFilter {
    /// Accept everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept only `topics`.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            discard_reasons: Vec::new(),
        }
    }

    /// Create a filter for discards with specific reasons.
    #[must_use]
    pub fn discards(reasons: Vec<DiscardReason>) -> Self {
        Self {
            topics: vec![EventTopic::Discard],
            discard_reasons: reasons,
        }
    }

    /// Topics this filter can accept events from. `[All]` when unrestricted.
    ///
    /// Reason filters are ignored: a discard filter covers the whole topic.
    #[must_use]
    pub fn covered_topics(&self) -> Vec<EventTopic> {
        if self.topics.is_empty() || self.topics.contains(&EventTopic::All) {
            return vec![EventTopic::All];
        }
        let mut topics = self.topics.clone();
        topics.sort_by_key(|t| *t as u8);
        topics.dedup();
        topics
    }

    /// Whether `event` passes both the topic and the reason filter.
    #[must_use]
    pub fn matches(&self, event: &BusEvent) -> bool {
        let topic = event.topic();
        let topic_match = self.topics.is_empty()
            || self.topics.iter().any(|t| *t == EventTopic::All || *t == topic);

        let reason_match = self.discard_reasons.is_empty()
            || event
                .discard_reason()
                .is_some_and(|reason| self.discard_reasons.contains(&reason));

        topic_match && reason_match
    }
}
