//! # Outbound Ports (Driven Ports)
//!
//! Dependencies required by the aggregator service.

use crate::adapters::lock::KeyGuard;
use crate::domain::correlation::CorrelationKey;
use crate::domain::errors::{DispatchError, StoreError};
use crate::domain::expiry::ExpiryPolicy;
use crate::domain::group::MessageGroup;
use async_trait::async_trait;
use shared_bus::DiscardNotice;
use shared_types::{Message, MessageId, Timestamp};

/// Owns every live message group.
///
/// Methods taking a [`KeyGuard`] operate on the guard's key and may only be
/// called while that lock is held; the guard is the proof.
///
/// Production: any crash-tolerant keyed store.
/// Testing: `InMemoryGroupStore`.
pub trait MessageGroupStore: Send + Sync {
    /// Current group for the locked key, if any.
    fn get(&self, guard: &KeyGuard) -> Option<MessageGroup>;

    /// Return the existing group, or create an empty one whose deadline is
    /// computed from `first` by `policy`.
    ///
    /// # Errors
    ///
    /// `StoreError::CapacityExceeded` when a new group would exceed the limit.
    /// Nothing is created in that case.
    fn load_or_create(
        &self,
        guard: &KeyGuard,
        first: &Message,
        policy: &dyn ExpiryPolicy,
        now: Timestamp,
    ) -> Result<MessageGroup, StoreError>;

    /// Append a member to the locked key's group.
    ///
    /// # Errors
    ///
    /// `StoreError::GroupNotFound` if the group does not exist.
    fn append(
        &self,
        guard: &KeyGuard,
        message: Message,
        now: Timestamp,
    ) -> Result<MessageGroup, StoreError>;

    /// Delete the locked key's group and return it.
    fn remove(&self, guard: &KeyGuard) -> Option<MessageGroup>;

    /// Take the members with the given ids out of the locked key's group and
    /// return them. A group left without members is deleted.
    fn take_members(&self, guard: &KeyGuard, ids: &[MessageId]) -> Vec<Message>;

    /// Keys whose deadline has passed at `now`. May be stale.
    fn list_expired(&self, now: Timestamp) -> Vec<CorrelationKey>;

    /// Number of live groups.
    fn len(&self) -> usize;

    /// Whether no group is live.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remembers processed message ids for a bounded window.
pub trait DedupStore: Send + Sync {
    /// Atomically record `id`. Returns `true` the first time an id is seen
    /// inside the retention window, `false` afterwards.
    fn admit(&self, id: &str, now: Timestamp) -> bool;

    /// Drop the record for `id` so a later delivery is admitted again.
    fn forget(&self, id: &str);

    /// Remove records whose retention has lapsed. Returns how many were removed.
    fn purge_expired(&self, now: Timestamp) -> usize;

    /// Number of live records.
    fn len(&self) -> usize;

    /// Whether no record is live.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Abstract interface for time operations (for testability).
pub trait TimeSource: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

/// Delivers results to the outbound destinations.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Publish a consolidated output to the resolved destination.
    async fn emit(&self, key: &CorrelationKey, output: Message) -> Result<(), DispatchError>;

    /// Publish messages to the discard destination.
    async fn discard(&self, notice: DiscardNotice) -> Result<(), DispatchError>;

    /// Raise an alert for an output lost after its group was removed.
    async fn dead_letter(
        &self,
        key: &CorrelationKey,
        output: Message,
        error: &DispatchError,
    ) -> Result<(), DispatchError>;
}
