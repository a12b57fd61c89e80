//! Auth error types.

use beacon_core::ErrorCategory;
use beacon_transport::{CodecError, TransportError};

/// Errors that can occur during authentication operations.
///
/// Cloneable: a failed re-authentication is reported both to the dispatch
/// cycle that triggered it and to any caller awaiting that cycle.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No response from the login endpoint.
    #[error("authentication request failed: {0}")]
    Network(#[from] TransportError),

    /// The login response matched neither the success nor the failure shape.
    #[error("corrupt authentication response: {0}")]
    CorruptResponse(String),

    /// The backend refused the credentials.
    #[error("authentication rejected: {message}")]
    Rejected {
        /// Backend-provided reason.
        message: String,
    },

    /// A challenge answer was required but empty.
    #[error("challenge answer not supplied")]
    ChallengeNotSupplied,

    /// `complete_challenge` was called with no challenge outstanding.
    #[error("no authentication challenge pending")]
    NoChallengePending,

    /// The secret provider produced no secret, or none was ever retained.
    #[error("no authentication secret available")]
    SecretUnavailable,

    /// `restUrl` is not configured.
    #[error("rest endpoint is not configured")]
    EndpointUnset,

    /// No identity has been established yet.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The request body could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl AuthError {
    /// Taxonomy bucket.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(e) => e.category(),
            Self::CorruptResponse(_) | Self::Codec(_) => ErrorCategory::Protocol,
            Self::Rejected { .. }
            | Self::ChallengeNotSupplied
            | Self::NoChallengePending
            | Self::SecretUnavailable => ErrorCategory::Authentication,
            Self::EndpointUnset | Self::NotAuthenticated => ErrorCategory::Configuration,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
