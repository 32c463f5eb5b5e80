//! # In-Memory Group Store
//!
//! Bounded map from correlation key to group. Mutations go through a
//! `KeyGuard`, so callers already hold the key's lock; the inner `RwLock`
//! only protects the map structure and is held for map operations alone.

use crate::adapters::lock::KeyGuard;
use crate::domain::correlation::CorrelationKey;
use crate::domain::errors::StoreError;
use crate::domain::expiry::ExpiryPolicy;
use crate::domain::group::MessageGroup;
use crate::ports::outbound::MessageGroupStore;
use parking_lot::RwLock;
use shared_types::{Message, MessageId, Timestamp};
use std::collections::HashMap;
use tracing::debug;

/// Group store kept in process memory.
pub struct InMemoryGroupStore {
    groups: RwLock<HashMap<CorrelationKey, MessageGroup>>,
    max_groups: usize,
}

impl InMemoryGroupStore {
    /// Create a store holding at most `max_groups` live groups.
    pub fn new(max_groups: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            max_groups,
        }
    }

    /// The live group limit.
    pub fn max_groups(&self) -> usize {
        self.max_groups
    }
}

impl MessageGroupStore for InMemoryGroupStore {
    fn get(&self, guard: &KeyGuard) -> Option<MessageGroup> {
        self.groups.read().get(guard.key()).cloned()
    }

    fn load_or_create(
        &self,
        guard: &KeyGuard,
        first: &Message,
        policy: &dyn ExpiryPolicy,
        now: Timestamp,
    ) -> Result<MessageGroup, StoreError> {
        let mut groups = self.groups.write();
        if let Some(existing) = groups.get(guard.key()) {
            return Ok(existing.clone());
        }

        // Check and insert under one write lock so the limit holds across keys
        if groups.len() >= self.max_groups {
            return Err(StoreError::CapacityExceeded {
                limit: self.max_groups,
            });
        }

        let group = MessageGroup::new(guard.key().clone(), now, policy.deadline(first, now));
        debug!(
            correlation_key = %guard.key(),
            expires_at = group.expires_at(),
            "Group created"
        );
        groups.insert(guard.key().clone(), group.clone());
        Ok(group)
    }

    fn append(
        &self,
        guard: &KeyGuard,
        message: Message,
        now: Timestamp,
    ) -> Result<MessageGroup, StoreError> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(guard.key())
            .ok_or_else(|| StoreError::GroupNotFound {
                key: guard.key().to_string(),
            })?;
        group.append(message, now);
        Ok(group.clone())
    }

    fn remove(&self, guard: &KeyGuard) -> Option<MessageGroup> {
        let mut group = self.groups.write().remove(guard.key())?;
        group.mark_complete();
        Some(group)
    }

    fn take_members(&self, guard: &KeyGuard, ids: &[MessageId]) -> Vec<Message> {
        let mut groups = self.groups.write();
        let Some(group) = groups.get_mut(guard.key()) else {
            return Vec::new();
        };
        let taken = group.take_members(ids);
        if group.is_empty() {
            groups.remove(guard.key());
            debug!(correlation_key = %guard.key(), "Group emptied");
        }
        taken
    }

    fn list_expired(&self, now: Timestamp) -> Vec<CorrelationKey> {
        let groups = self.groups.read();
        let mut expired: Vec<(Timestamp, CorrelationKey)> = groups
            .values()
            .filter(|g| g.is_expired(now))
            .map(|g| (g.expires_at(), g.key().clone()))
            .collect();
        // Oldest deadline first
        expired.sort();
        expired.into_iter().map(|(_, key)| key).collect()
    }

    fn len(&self) -> usize {
        self.groups.read().len()
    }
}
