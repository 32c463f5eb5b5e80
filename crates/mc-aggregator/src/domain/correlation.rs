//! # Correlation
//!
//! Derives correlation keys and deduplication keys from message headers.
//! Both are pure functions of the headers: the same headers always give the
//! same keys.

use crate::domain::errors::CorrelationError;
use serde::{Deserialize, Serialize};
use shared_types::{header_names, Message};
use std::fmt;

/// Opaque key grouping messages that belong together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Wrap a key value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Derives the correlation key of a message.
pub trait CorrelationKeyResolver: Send + Sync {
    /// Resolve the key, or report which header is missing.
    fn resolve(&self, message: &Message) -> Result<CorrelationKey, CorrelationError>;
}

/// Uses the value of a single header as the key.
#[derive(Debug, Clone)]
pub struct HeaderAttributeResolver {
    header: &'static str,
}

impl HeaderAttributeResolver {
    /// Correlate on `header`.
    pub fn new(header: &'static str) -> Self {
        Self { header }
    }
}

impl CorrelationKeyResolver for HeaderAttributeResolver {
    fn resolve(&self, message: &Message) -> Result<CorrelationKey, CorrelationError> {
        required(message, self.header).map(CorrelationKey::new)
    }
}

/// Message connector correlation.
///
/// An explicit `correlationId` header wins. Otherwise the key is
/// `appName:messageEventName`, suffixed with `:messageEventCorrelationKey`
/// when the message definition has a business correlation key.
#[derive(Debug, Clone, Default)]
pub struct MessageEventResolver;

impl CorrelationKeyResolver for MessageEventResolver {
    fn resolve(&self, message: &Message) -> Result<CorrelationKey, CorrelationError> {
        if let Some(explicit) = present(message, header_names::CORRELATION_ID) {
            return Ok(CorrelationKey::new(explicit));
        }

        let app = required(message, header_names::APP_NAME)?;
        let name = required(message, header_names::MESSAGE_EVENT_NAME)?;

        let key = match present(message, header_names::MESSAGE_EVENT_CORRELATION_KEY) {
            Some(business_key) => format!("{app}:{name}:{business_key}"),
            None => format!("{app}:{name}"),
        };
        Ok(CorrelationKey::new(key))
    }
}

/// Deduplication key of a message: the `messageEventId` header when present,
/// the envelope id otherwise.
pub fn dedup_key(message: &Message) -> String {
    present(message, header_names::MESSAGE_EVENT_ID)
        .map(str::to_owned)
        .unwrap_or_else(|| message.id().to_string())
}

fn present<'a>(message: &'a Message, header: &str) -> Option<&'a str> {
    message.header(header).filter(|v| !v.trim().is_empty())
}

fn required<'a>(message: &'a Message, header: &'static str) -> Result<&'a str, CorrelationError> {
    present(message, header).ok_or(CorrelationError::MissingCorrelationData { header })
}
