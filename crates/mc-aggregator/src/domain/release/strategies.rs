//! Release strategies shipped with the engine.

use super::{ReleaseContext, ReleaseDecision, ReleaseStrategy};
use crate::domain::group::MessageGroup;
use shared_types::{event_types, header_names};

/// Releases once a `MESSAGE_SENT` member meets a subscriber
/// (`START_MESSAGE_DEPLOYED` or `MESSAGE_WAITING`).
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageSentReleaseStrategy;

impl ReleaseStrategy for MessageSentReleaseStrategy {
    fn name(&self) -> &'static str {
        "message-sent"
    }

    fn decide(&self, group: &MessageGroup, _ctx: &ReleaseContext) -> ReleaseDecision {
        let subscribed = event_types::SUBSCRIBERS
            .iter()
            .any(|kind| group.has_kind(kind));

        if subscribed && group.has_kind(event_types::MESSAGE_SENT) {
            ReleaseDecision::Release
        } else {
            ReleaseDecision::Continue
        }
    }
}

/// Releases once every required value has been seen in a header.
///
/// Matches on `messageEventType` unless another header is configured.
#[derive(Debug, Clone)]
pub struct RequiredKindsReleaseStrategy {
    header: String,
    required: Vec<String>,
}

impl RequiredKindsReleaseStrategy {
    /// Require one member of each kind.
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            header: header_names::MESSAGE_EVENT_TYPE.to_owned(),
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    /// Match on a different header.
    pub fn on_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }
}

impl ReleaseStrategy for RequiredKindsReleaseStrategy {
    fn name(&self) -> &'static str {
        "required-kinds"
    }

    fn decide(&self, group: &MessageGroup, _ctx: &ReleaseContext) -> ReleaseDecision {
        let all_present = self.required.iter().all(|wanted| {
            group
                .members()
                .iter()
                .any(|m| m.header(&self.header) == Some(wanted.as_str()))
        });

        if all_present {
            ReleaseDecision::Release
        } else {
            ReleaseDecision::Continue
        }
    }
}

/// Releases once the group holds at least `expected` members.
#[derive(Debug, Clone, Copy)]
pub struct ExpectedCountReleaseStrategy {
    expected: usize,
}

impl ExpectedCountReleaseStrategy {
    pub fn new(expected: usize) -> Self {
        Self { expected }
    }
}

impl ReleaseStrategy for ExpectedCountReleaseStrategy {
    fn name(&self) -> &'static str {
        "expected-count"
    }

    fn decide(&self, group: &MessageGroup, _ctx: &ReleaseContext) -> ReleaseDecision {
        if group.len() >= self.expected {
            ReleaseDecision::Release
        } else {
            ReleaseDecision::Continue
        }
    }
}

/// Discards the group once a cancellation member is present.
#[derive(Debug, Clone)]
pub struct CancelledDiscardStrategy {
    kind: String,
}

impl CancelledDiscardStrategy {
    /// Treat `kind` as the cancellation marker.
    pub fn for_kind(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

impl Default for CancelledDiscardStrategy {
    fn default() -> Self {
        Self::for_kind(event_types::MESSAGE_SUBSCRIPTION_CANCELLED)
    }
}

impl ReleaseStrategy for CancelledDiscardStrategy {
    fn name(&self) -> &'static str {
        "cancelled-discard"
    }

    fn decide(&self, group: &MessageGroup, _ctx: &ReleaseContext) -> ReleaseDecision {
        if group.has_kind(&self.kind) {
            ReleaseDecision::Discard
        } else {
            ReleaseDecision::Continue
        }
    }
}

/// On forced evaluation only, releases a partial group holding at least
/// `min_members` members.
#[derive(Debug, Clone, Copy)]
pub struct PartialReleaseOnExpiryStrategy {
    min_members: usize,
}

impl PartialReleaseOnExpiryStrategy {
    pub fn new(min_members: usize) -> Self {
        Self { min_members }
    }
}

impl ReleaseStrategy for PartialReleaseOnExpiryStrategy {
    fn name(&self) -> &'static str {
        "partial-release-on-expiry"
    }

    fn decide(&self, group: &MessageGroup, ctx: &ReleaseContext) -> ReleaseDecision {
        if ctx.deadline_passed && group.len() >= self.min_members.max(1) {
            ReleaseDecision::Release
        } else {
            ReleaseDecision::Continue
        }
    }
}
