//! # Expiry Policies
//!
//! A group's deadline is computed once, when the group is created, from the
//! message that creates it. Later members never move the deadline.

use crate::domain::config::duration_millis;
use shared_types::{Message, Timestamp};
use std::time::Duration;
use tracing::warn;

/// Computes the absolute expiry deadline of a new group.
pub trait ExpiryPolicy: Send + Sync {
    /// Deadline for a group created at `created_at` by `first`.
    fn deadline(&self, first: &Message, created_at: Timestamp) -> Timestamp;
}

/// Every group lives for the same duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedExpiry {
    timeout_ms: u64,
}

impl FixedExpiry {
    /// Expire groups `timeout` after creation.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout_ms: duration_millis(timeout),
        }
    }
}

impl ExpiryPolicy for FixedExpiry {
    fn deadline(&self, _first: &Message, created_at: Timestamp) -> Timestamp {
        created_at.saturating_add(self.timeout_ms)
    }
}

/// Reads a per-group timeout (milliseconds) from a header of the creating
/// message, falling back to a fixed timeout when the header is absent or invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderExpiry {
    header: String,
    fallback: FixedExpiry,
    max_ms: u64,
}

impl HeaderExpiry {
    /// Create a header-driven policy. Overrides are capped at `max`.
    pub fn new(header: impl Into<String>, fallback: FixedExpiry, max: Duration) -> Self {
        Self {
            header: header.into(),
            fallback,
            max_ms: duration_millis(max),
        }
    }
}

impl ExpiryPolicy for HeaderExpiry {
    fn deadline(&self, first: &Message, created_at: Timestamp) -> Timestamp {
        let Some(raw) = first.header(&self.header) else {
            return self.fallback.deadline(first, created_at);
        };

        match raw.trim().parse::<u64>() {
            Ok(timeout_ms) if timeout_ms > 0 => {
                created_at.saturating_add(timeout_ms.min(self.max_ms))
            }
            _ => {
                warn!(
                    header = %self.header,
                    value = %raw,
                    message_id = %first.id(),
                    "Ignoring invalid group timeout override"
                );
                self.fallback.deadline(first, created_at)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::header_names;

    fn message_with_timeout(value: Option<&str>) -> Message {
        Message::builder(json!({}))
            .header_opt(header_names::GROUP_TIMEOUT, value)
            .build()
    }

    fn policy() -> HeaderExpiry {
        HeaderExpiry::new(
            header_names::GROUP_TIMEOUT,
            FixedExpiry::new(Duration::from_secs(5)),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_fixed_expiry() {
        let policy = FixedExpiry::new(Duration::from_secs(5));
        assert_eq!(policy.deadline(&message_with_timeout(None), 1_000), 6_000);
    }

    #[test]
    fn test_header_override() {
        assert_eq!(policy().deadline(&message_with_timeout(Some("250")), 1_000), 1_250);
    }

    #[test]
    fn test_header_override_is_capped() {
        assert_eq!(
            policy().deadline(&message_with_timeout(Some("999999999")), 0),
            60_000
        );
    }

    #[test]
    fn test_invalid_header_falls_back() {
        assert_eq!(policy().deadline(&message_with_timeout(Some("soon")), 0), 5_000);
        assert_eq!(policy().deadline(&message_with_timeout(Some("0")), 0), 5_000);
        assert_eq!(policy().deadline(&message_with_timeout(None), 0), 5_000);
    }
}
