//! # Message Envelope
//!
//! An immutable envelope: unique id, creation time, string headers and a JSON
//! payload. Built with [`MessageBuilder`].

use crate::errors::PayloadError;
use crate::headers::header_names;
use crate::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Message headers. Ordered so that serialized envelopes are stable.
pub type Headers = BTreeMap<String, String>;

/// Globally unique message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An immutable message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    id: MessageId,
    #[serde(default = "now_millis")]
    timestamp: Timestamp,
    #[serde(default)]
    headers: Headers,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Message {
    /// Start building a message around a payload.
    #[must_use]
    pub fn builder(payload: serde_json::Value) -> MessageBuilder {
        MessageBuilder::new(payload)
    }

    /// Build a message from a serializable payload.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::Encode` if the payload cannot be turned into JSON.
    pub fn builder_from<T: Serialize>(payload: &T) -> Result<MessageBuilder, PayloadError> {
        Ok(MessageBuilder::new(serde_json::to_value(payload)?))
    }

    /// Unique id of this envelope.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// When the envelope was created.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// All headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// A single header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// The raw JSON payload.
    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// The message event kind (`messageEventType` header).
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.header(header_names::MESSAGE_EVENT_TYPE)
    }

    /// Whether this message is of the given kind.
    #[must_use]
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind() == Some(kind)
    }

    /// Decode the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::Decode` if the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| PayloadError::Decode {
            expected: std::any::type_name::<T>(),
            source,
        })
    }

    /// Derive a copy of this message with one more header. The id is kept.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Builder for [`Message`].
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    id: Option<MessageId>,
    timestamp: Option<Timestamp>,
    headers: Headers,
    payload: serde_json::Value,
}

impl MessageBuilder {
    fn new(payload: serde_json::Value) -> Self {
        Self {
            id: None,
            timestamp: None,
            headers: Headers::new(),
            payload,
        }
    }

    /// Use a specific id instead of a generated one.
    #[must_use]
    pub fn id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Use a specific creation time.
    #[must_use]
    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set a header only when a value is present.
    #[must_use]
    pub fn header_opt(self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.header(name, value),
            None => self,
        }
    }

    /// Copy every header from an existing map.
    #[must_use]
    pub fn headers(mut self, headers: &Headers) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Finish the envelope.
    #[must_use]
    pub fn build(self) -> Message {
        Message {
            id: self.id.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or_else(now_millis),
            headers: self.headers,
            payload: self.payload,
        }
    }
}

fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
