//! # Domain Layer
//!
//! Pure logic for the aggregation engine: no I/O, no clocks, no locks.
//!
//! ## Modules
//!
//! - `correlation` - Correlation keys, resolvers and deduplication keys
//! - `group` - The message group aggregate
//! - `release` - Release strategy chain
//! - `acknowledge` - Events that settle buffered members instead of joining
//! - `processor` - Group processor chain
//! - `expiry` - Group deadline policies
//! - `config` - Engine configuration
//! - `errors` - Domain error types

pub mod acknowledge;
pub mod config;
pub mod correlation;
pub mod errors;
pub mod expiry;
pub mod group;
pub mod processor;
pub mod release;
