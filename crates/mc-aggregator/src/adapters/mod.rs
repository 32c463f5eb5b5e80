//! # Adapters Layer
//!
//! Implementations of the outbound ports, plus the keyed lock registry.
//!
//! - `lock` - per-key mutual exclusion
//! - `memory_store` - bounded in-memory group store
//! - `dedup` - time-bounded dedup records
//! - `time` - wall clock and manual clock
//! - `dispatcher` - event bus and channel dispatchers

pub mod dedup;
pub mod dispatcher;
pub mod lock;
pub mod memory_store;
pub mod time;
