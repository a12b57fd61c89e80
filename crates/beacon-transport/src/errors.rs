//! Transport and codec error types.

use beacon_core::ErrorCategory;

/// A request that produced no usable response.
///
/// Cloneable so a single failure can be handed to both a callback and an
/// awaiting ticket.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, TLS failure, reset, body read failure.
    #[error("network error: {0}")]
    Network(String),

    /// The request exceeded the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// A gateway answered on behalf of an unreachable backend.
    #[error("service unavailable ({status})")]
    Unavailable {
        /// HTTP status code (502, 503 or 504).
        status: u16,
    },

    /// The request could not be built (bad URL, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Taxonomy bucket.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest(_) => ErrorCategory::Configuration,
            Self::Network(_) | Self::Timeout | Self::Unavailable { .. } => ErrorCategory::Network,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// JSON encoding or decoding failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A body did not match the requested shape.
    #[error("decode failed: {0}")]
    Decode(String),
}

impl CodecError {
    /// Taxonomy bucket; codec failures are protocol errors.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Protocol
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
