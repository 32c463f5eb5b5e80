//! # Shared Types Crate
//!
//! The message envelope and vocabulary shared by every crate in the workspace.
//!
//! ## Design Principles
//!
//! - **Immutable Envelope**: A `Message` never changes after it is built. Code that
//!   needs different headers derives a new message with `with_header`.
//! - **Headers Carry Routing**: Correlation and deduplication data live in the
//!   headers, never in the payload. Payloads are opaque JSON to the engine.
//! - **Millisecond Clock**: Every timestamp in the workspace is milliseconds since
//!   the Unix epoch.

pub mod errors;
pub mod headers;
pub mod message;
pub mod payload;

pub use errors::PayloadError;
pub use headers::{event_types, header_names, payload_types};
pub use message::{Headers, Message, MessageBuilder, MessageId};
pub use payload::{MessageEventPayload, ReceiveMessagePayload, StartMessagePayload};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
