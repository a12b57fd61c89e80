//! In-memory authentication state.

use std::fmt;

use beacon_core::SessionId;
use chrono::{DateTime, Utc};

use crate::types::{AuthChallenge, AuthIdentity, AuthPhase, Credentials};

/// Everything the manager remembers between logins. Never serialized.
#[derive(Clone, Default)]
pub(crate) struct AuthState {
    pub phase: AuthPhase,
    pub identity: Option<AuthIdentity>,
    /// Application secret of the last successful login.
    pub auth_secret: Option<String>,
    pub session_id: Option<SessionId>,
    pub api_token: Option<String>,
    pub api_secret: Option<String>,
    pub token_expiration: Option<DateTime<Utc>>,
    pub challenge: Option<AuthChallenge>,
    /// Bumped on every successful login.
    pub generation: u64,
}

impl AuthState {
    pub fn credentials(&self) -> Option<Credentials> {
        Some(Credentials {
            token: self.api_token.clone()?,
            secret: self.api_secret.clone()?,
        })
    }

    pub fn store_token(&mut self, token: String, secret: String, expiration: Option<DateTime<Utc>>) {
        self.api_token = Some(token);
        self.api_secret = Some(secret);
        self.token_expiration = expiration;
        self.generation += 1;
    }

    pub fn clear_token(&mut self) {
        self.api_token = None;
        self.api_secret = None;
        self.token_expiration = None;
    }

    /// Phase to fall back to after a failed login attempt.
    pub fn settled_phase(&self) -> AuthPhase {
        if self.api_token.is_some() {
            AuthPhase::Authenticated
        } else {
            AuthPhase::Failed
        }
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("phase", &self.phase)
            .field("identity", &self.identity)
            .field("session_id", &self.session_id)
            .field("has_token", &self.api_token.is_some())
            .field("token_expiration", &self.token_expiration)
            .field("challenge_pending", &self.challenge.is_some())
            .finish_non_exhaustive()
    }
}
