//! # Keyed Lock Registry
//!
//! Mutual exclusion per correlation key. Different keys never contend.
//!
//! Each key maps to an `Arc<tokio::sync::Mutex<()>>`, created on first use and
//! removed when the last holder or waiter lets go. Waiting suspends the task;
//! it never spins. The tokio mutex is fair (FIFO), so a waiting sweeper cannot
//! overtake live traffic queued before it.

use crate::domain::correlation::CorrelationKey;
use crate::domain::errors::LockError;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<CorrelationKey, Arc<Mutex<()>>>;

/// Hands out per-key locks.
#[derive(Clone, Default)]
pub struct KeyedLockRegistry {
    locks: Arc<LockMap>,
}

impl KeyedLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free and take it.
    pub async fn acquire(&self, key: &CorrelationKey) -> KeyGuard {
        let mutex = self.mutex_for(key);
        let guard = mutex.lock_owned().await;
        self.guard(key, guard)
    }

    /// Like [`acquire`](Self::acquire), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// `LockError::Timeout` if the lock was not obtained in time. Nothing is
    /// held afterwards.
    pub async fn acquire_timeout(
        &self,
        key: &CorrelationKey,
        timeout: Duration,
    ) -> Result<KeyGuard, LockError> {
        let mutex = self.mutex_for(key);
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(self.guard(key, guard)),
            Err(_) => {
                self.release_if_idle(key);
                Err(LockError::Timeout {
                    key: key.to_string(),
                    waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Take `key` only if nobody holds or waits for it.
    pub fn try_acquire(&self, key: &CorrelationKey) -> Option<KeyGuard> {
        let mutex = self.mutex_for(key);
        match mutex.try_lock_owned() {
            Ok(guard) => Some(self.guard(key, guard)),
            Err(_) => {
                self.release_if_idle(key);
                None
            }
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no key is held or awaited.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn mutex_for(&self, key: &CorrelationKey) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }

    /// Drop the entry for `key` when nobody holds or awaits it.
    fn release_if_idle(&self, key: &CorrelationKey) {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    fn guard(&self, key: &CorrelationKey, guard: OwnedMutexGuard<()>) -> KeyGuard {
        KeyGuard {
            key: key.clone(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }
}

/// Exclusive ownership of one correlation key. Released on drop.
pub struct KeyGuard {
    key: CorrelationKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl KeyGuard {
    /// The locked key.
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }
}

impl fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key).finish()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Unlock first so the map holds the only reference when nobody waits
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
