//! # Header Vocabulary
//!
//! Well-known header names and message event kinds.
//!
//! Upstream producers stamp these headers on every message event. The engine reads
//! them to derive correlation keys and deduplication keys; the outbound processors
//! copy the routing ones onto consolidated results.

/// Header names understood by the engine.
pub mod header_names {
    /// Explicit correlation id. Takes precedence over the composed key.
    pub const CORRELATION_ID: &str = "correlationId";

    /// Unique id of the business event. Preferred deduplication key.
    pub const MESSAGE_EVENT_ID: &str = "messageEventId";

    /// Kind of the message event (see [`super::event_types`]).
    pub const MESSAGE_EVENT_TYPE: &str = "messageEventType";

    /// Business message name (e.g. the BPMN message definition name).
    pub const MESSAGE_EVENT_NAME: &str = "messageEventName";

    /// Business correlation key. Absent for start-message definitions.
    pub const MESSAGE_EVENT_CORRELATION_KEY: &str = "messageEventCorrelationKey";

    /// Application that produced the event.
    pub const APP_NAME: &str = "appName";

    /// Fully-qualified name of the producing service.
    pub const SERVICE_FULL_NAME: &str = "serviceFullName";

    /// Destination the consolidated result should be routed to.
    pub const MESSAGE_EVENT_OUTPUT_DESTINATION: &str = "messageEventOutputDestination";

    /// Type of the consolidated payload stamped on outbound messages.
    pub const MESSAGE_PAYLOAD_TYPE: &str = "messagePayloadType";

    /// Per-group timeout override in milliseconds.
    pub const GROUP_TIMEOUT: &str = "groupTimeout";

    /// Headers copied verbatim from group members onto the consolidated output.
    pub const ROUTING: [&str; 3] = [APP_NAME, SERVICE_FULL_NAME, MESSAGE_EVENT_OUTPUT_DESTINATION];
}

/// Message event kinds carried in the `messageEventType` header.
pub mod event_types {
    /// A process definition with a message start event was deployed.
    pub const START_MESSAGE_DEPLOYED: &str = "START_MESSAGE_DEPLOYED";

    /// A process threw a message.
    pub const MESSAGE_SENT: &str = "MESSAGE_SENT";

    /// A process instance is waiting on an intermediate catch message.
    pub const MESSAGE_WAITING: &str = "MESSAGE_WAITING";

    /// A waiting process instance consumed its message.
    pub const MESSAGE_RECEIVED: &str = "MESSAGE_RECEIVED";

    /// A message subscription was cancelled.
    pub const MESSAGE_SUBSCRIPTION_CANCELLED: &str = "MESSAGE_SUBSCRIPTION_CANCELLED";

    /// Kinds that represent a party waiting for a `MESSAGE_SENT`.
    pub const SUBSCRIBERS: [&str; 2] = [START_MESSAGE_DEPLOYED, MESSAGE_WAITING];
}

/// Payload type names stamped on consolidated outputs.
pub mod payload_types {
    /// Output that starts a new process instance.
    pub const START_MESSAGE_PAYLOAD: &str = "StartMessagePayload";

    /// Output that resumes a waiting process instance.
    pub const RECEIVE_MESSAGE_PAYLOAD: &str = "ReceiveMessagePayload";

    /// Output that carries every member payload in arrival order.
    pub const MERGED_MESSAGE_PAYLOAD: &str = "MergedMessagePayload";
}
