//! Error taxonomy shared by every beacon crate.
//!
//! Each crate defines its own `thiserror` enum; all of them classify into an
//! [`ErrorCategory`] so callers can branch on the kind of failure without
//! matching on crate-specific variants.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad classification of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Not yet authenticated, endpoint unset, invalid settings.
    Configuration,
    /// Cache or queue full.
    Capacity,
    /// Transport failure on send, auth or delete.
    Network,
    /// Response matched neither the success nor the failure schema.
    Protocol,
    /// Credentials rejected, challenge missing, secret unavailable.
    Authentication,
    /// Referenced storage entry not found, and similar caller mistakes.
    Application,
}

impl ErrorCategory {
    /// Whether failures in this category are worth retrying later.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Capacity)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Capacity => "capacity",
            Self::Network => "network",
            Self::Protocol => "protocol",
            Self::Authentication => "authentication",
            Self::Application => "application",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_snake_case() {
        assert_eq!(ErrorCategory::Authentication.to_string(), "authentication");
        let json = serde_json::to_string(&ErrorCategory::Protocol).unwrap();
        assert_eq!(json, "\"protocol\"");
    }

    #[test]
    fn transient_categories() {
        assert!(ErrorCategory::Network.is_transient());
        assert!(ErrorCategory::Capacity.is_transient());
        assert!(!ErrorCategory::Protocol.is_transient());
        assert!(!ErrorCategory::Authentication.is_transient());
    }
}
