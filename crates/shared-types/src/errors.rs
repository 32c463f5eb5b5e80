//! # Error Types
//!
//! Errors raised while reading typed data out of a message envelope.

use thiserror::Error;

/// Errors that can occur when decoding a message payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The payload could not be decoded into the requested type.
    #[error("Payload is not a valid {expected}: {source}")]
    Decode {
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The payload could not be encoded.
    #[error("Payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}
