//! Dispatch error types.

use beacon_auth::AuthError;
use beacon_core::{ErrorCategory, RecordKind};
use beacon_transport::{CodecError, TransportError};

/// Errors reported by dispatch cycles and sequencer submissions.
///
/// Cloneable: each result is delivered to the completion callback and to
/// the submission's ticket.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// No credentials have been established.
    #[error("not authenticated")]
    NotAuthenticated,

    /// `restUrl` is not configured.
    #[error("rest endpoint is not configured")]
    EndpointUnset,

    /// Settings failed validation.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// The store already holds its limit of unsent records.
    #[error("{kind} cache full ({limit} unsent records)")]
    CacheFull {
        /// Store kind.
        kind: RecordKind,
        /// Configured `maxCachedItems`.
        limit: usize,
    },

    /// The lane's submission queue is full.
    #[error("{kind} submission queue full")]
    QueueFull {
        /// Lane kind.
        kind: RecordKind,
    },

    /// Every attempt ended without a response.
    #[error("send failed: {0}")]
    Network(#[from] TransportError),

    /// The response matched neither expected shape.
    #[error("corrupt response: {0}")]
    CorruptResponse(String),

    /// The backend refused the request and re-authentication did not help.
    #[error("request rejected: {message}")]
    Rejected {
        /// Backend-provided reason.
        message: String,
    },

    /// Re-authentication failed.
    #[error(transparent)]
    Auth(AuthError),

    /// The referenced storage entry does not exist.
    #[error("storage entry not found: {name}")]
    StorageEntryNotFound {
        /// Entry name.
        name: String,
    },

    /// Encoding a request failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The sequencer is shut down.
    #[error("dispatcher is shut down")]
    SequencerClosed,
}

impl DispatchError {
    /// Taxonomy bucket.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotAuthenticated | Self::EndpointUnset | Self::InvalidSettings(_) => {
                ErrorCategory::Configuration
            }
            Self::CacheFull { .. } | Self::QueueFull { .. } => ErrorCategory::Capacity,
            Self::Network(e) => e.category(),
            Self::CorruptResponse(_) | Self::Codec(_) => ErrorCategory::Protocol,
            Self::Rejected { .. } => ErrorCategory::Authentication,
            Self::Auth(e) => e.category(),
            Self::StorageEntryNotFound { .. } | Self::SequencerClosed => ErrorCategory::Application,
        }
    }
}

impl From<AuthError> for DispatchError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotAuthenticated => Self::NotAuthenticated,
            AuthError::EndpointUnset => Self::EndpointUnset,
            other => Self::Auth(other),
        }
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
