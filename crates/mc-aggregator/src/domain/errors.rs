//! # Domain Errors
//!
//! Error types for the aggregation engine.
//!
//! ## Design Principles
//!
//! - Per-message failures are outcomes, not errors: they end on the discard path
//! - Only `AggregatorError` crosses the `submit` boundary
//! - No panics in domain logic (use Result instead)

use shared_bus::EventTopic;
use thiserror::Error;

/// A correlation key could not be derived from a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// A header required to build the key is absent or blank.
    #[error("Missing correlation data: header '{header}' is absent")]
    MissingCorrelationData { header: &'static str },
}

/// The processor chain could not turn a released group into an output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    /// No stage recognised the group contents.
    #[error("No message definition matches group '{correlation_key}'")]
    NoMatchingDefinition { correlation_key: String },

    /// A stage recognised the group but a member it needs is absent.
    #[error("Group '{correlation_key}' has no member of kind {kind}")]
    MissingMember {
        correlation_key: String,
        kind: &'static str,
    },

    /// A member payload does not have the expected shape.
    #[error("Invalid payload in member {message_id}: {reason}")]
    InvalidPayload { message_id: String, reason: String },
}

/// Delivery to an outbound destination failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Nobody listens on the destination.
    #[error("No subscribers on topic {topic:?}")]
    NoSubscribers { topic: EventTopic },

    /// Listeners exist but did not take the output in time.
    #[error("Subscribers on topic {topic:?} did not drain within {waited_ms}ms")]
    Backpressure { topic: EventTopic, waited_ms: u64 },

    /// The destination channel was closed.
    #[error("Destination closed")]
    Closed,
}

/// Acquiring a correlation key lock failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The caller-side acquisition timeout elapsed.
    #[error("Timed out after {waited_ms}ms waiting for lock on '{key}'")]
    Timeout { key: String, waited_ms: u64 },
}

/// Group store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Creating the group would exceed the live group limit.
    #[error("Group store full ({limit} groups)")]
    CapacityExceeded { limit: usize },

    /// The group vanished while its lock was held.
    #[error("Group '{key}' not found")]
    GroupNotFound { key: String },
}

/// Errors returned to callers of `submit`.
///
/// Every variant leaves the message retry-able: nothing was appended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregatorError {
    /// The aggregator was stopped through the control bus.
    #[error("Aggregator is stopped")]
    Stopped,

    /// The key lock could not be acquired in time.
    #[error(transparent)]
    LockTimeout(#[from] LockError),
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A duration setting is zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    /// A numeric setting is outside its allowed range.
    #[error("{field} = {value} is out of range (max {max})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },

    /// A header name setting is blank.
    #[error("{field} must not be blank")]
    BlankHeader { field: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_converts_transparently() {
        let err: AggregatorError = LockError::Timeout {
            key: "k".into(),
            waited_ms: 50,
        }
        .into();

        assert_eq!(err.to_string(), "Timed out after 50ms waiting for lock on 'k'");
    }

    #[test]
    fn test_missing_correlation_message_names_header() {
        let err = CorrelationError::MissingCorrelationData { header: "appName" };
        assert!(err.to_string().contains("appName"));
    }
}
