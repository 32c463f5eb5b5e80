//! # Business Payloads
//!
//! The payload carried by message events. Field names follow the camelCase JSON
//! produced by the upstream runtime bundles.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload of a message event (sent, waiting, received, start deployed...).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEventPayload {
    /// Message definition name.
    pub name: String,

    /// Business correlation key, when the message definition has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,

    /// Business key of the process instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,

    /// Variables carried by the message.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl MessageEventPayload {
    /// Create a payload for a message name with no variables.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the correlation key.
    #[must_use]
    pub fn with_correlation_key(mut self, key: Option<impl Into<String>>) -> Self {
        self.correlation_key = key.map(Into::into);
        self
    }

    /// Set the business key.
    #[must_use]
    pub fn with_business_key(mut self, key: Option<impl Into<String>>) -> Self {
        self.business_key = key.map(Into::into);
        self
    }

    /// Add a variable.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

/// Consolidated payload that starts a new process instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMessagePayload {
    /// Name of the start message definition.
    pub name: String,

    /// Business key handed over by the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,

    /// Variables handed over by the sender.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

/// Consolidated payload that resumes a waiting process instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveMessagePayload {
    /// Name of the message the instance waits on.
    pub name: String,

    /// Correlation key of the waiting subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,

    /// Variables handed over by the sender.
    #[serde(default)]
    pub variables: Map<String, Value>,
}
