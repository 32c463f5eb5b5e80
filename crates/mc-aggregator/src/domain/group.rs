//! # Message Group
//!
//! The buffered set of messages sharing one correlation key.
//!
//! A group is created by the first message for an absent key, appended to by
//! every later correlating message, and destroyed on release, discard or forced
//! expiry. It is only ever read or written while its key's lock is held.

use crate::domain::correlation::CorrelationKey;
use serde::Serialize;
use shared_types::{Message, MessageId, Timestamp};

/// A pending group of correlated messages.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroup {
    key: CorrelationKey,
    members: Vec<Message>,
    created_at: Timestamp,
    last_modified: Timestamp,
    expires_at: Timestamp,
    complete: bool,
}

impl MessageGroup {
    /// Create an empty group. The deadline never changes afterwards.
    pub fn new(key: CorrelationKey, created_at: Timestamp, expires_at: Timestamp) -> Self {
        Self {
            key,
            members: Vec::new(),
            created_at,
            last_modified: created_at,
            expires_at,
            complete: false,
        }
    }

    /// Append a member, keeping arrival order.
    pub fn append(&mut self, message: Message, now: Timestamp) {
        self.members.push(message);
        self.last_modified = now;
    }

    /// Remove the members whose id is in `ids`, keeping the rest in arrival order.
    pub fn take_members(&mut self, ids: &[MessageId]) -> Vec<Message> {
        let (taken, kept): (Vec<Message>, Vec<Message>) = std::mem::take(&mut self.members)
            .into_iter()
            .partition(|m| ids.contains(&m.id()));
        self.members = kept;
        taken
    }

    /// Mark the group as resolved (released or discarded).
    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Correlation key of this group.
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Members in arrival order.
    pub fn members(&self) -> &[Message] {
        &self.members
    }

    /// Consume the group, keeping its members.
    pub fn into_members(self) -> Vec<Message> {
        self.members
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members yet.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// When the group was created.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// When the last member was appended.
    pub fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    /// Absolute expiry deadline.
    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// Whether the group has been resolved.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// First member of the given kind.
    pub fn find_kind(&self, kind: &str) -> Option<&Message> {
        self.members.iter().find(|m| m.is_kind(kind))
    }

    /// Whether any member has the given kind.
    pub fn has_kind(&self, kind: &str) -> bool {
        self.find_kind(kind).is_some()
    }

    /// Read-only summary for the control bus.
    pub fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            correlation_key: self.key.to_string(),
            member_ids: self.members.iter().map(Message::id).collect(),
            member_kinds: self
                .members
                .iter()
                .map(|m| m.kind().unwrap_or_default().to_owned())
                .collect(),
            created_at: self.created_at,
            last_modified: self.last_modified,
            expires_at: self.expires_at,
        }
    }
}

/// Serializable view of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    pub correlation_key: String,
    pub member_ids: Vec<MessageId>,
    pub member_kinds: Vec<String>,
    pub created_at: Timestamp,
    pub last_modified: Timestamp,
    pub expires_at: Timestamp,
}
