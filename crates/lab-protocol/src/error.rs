//! Parse Error Types

use thiserror::Error;

/// Errors that reject a whole payload
#[derive(Debug, Error)]
pub enum ParseError {
    /// Payload was empty or whitespace
    #[error("Empty payload")]
    EmptyPayload,

    /// Payload larger than the configured limit
    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Bytes are not valid UTF-8
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),

    /// Payload is not JSON at all
    #[error("Malformed JSON envelope: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// JSON is well-formed but not a resource
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Resource type is neither Bundle nor Observation
    #[error("Unsupported resource type: {0}")]
    UnsupportedResource(String),
}
