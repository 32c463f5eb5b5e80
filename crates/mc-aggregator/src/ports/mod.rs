//! # Ports Layer
//!
//! Port traits for the aggregation engine (hexagonal architecture).
//!
//! - `inbound` - Driving ports (the API the engine exposes)
//! - `outbound` - Driven ports (what the engine requires)

pub mod inbound;
pub mod outbound;
