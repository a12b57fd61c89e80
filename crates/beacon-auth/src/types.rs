//! Authentication types: identity, environment metadata, login wire shapes.

use std::fmt;

use beacon_core::{Meta, SessionId};
use serde::{Deserialize, Serialize};

/// Key/value data for the second step of a two-step login.
pub type AuthChallenge = Meta;

/// Key under which the user's answer is added to the challenge.
pub const CHALLENGE_ANSWER_KEY: &str = "answer";

/// Fixed identity established by the first `authenticate` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthIdentity {
    /// Application identifier.
    pub app_id: String,
    /// Organization identifier.
    pub org_id: String,
    /// Device identifier.
    pub device_id: String,
    /// Distribution partner, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<String>,
}

impl AuthIdentity {
    /// Identity without a partner.
    pub fn new(
        app_id: impl Into<String>,
        org_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            org_id: org_id.into(),
            device_id: device_id.into(),
            partner: None,
        }
    }

    /// Attach a partner.
    #[must_use]
    pub fn with_partner(mut self, partner: impl Into<String>) -> Self {
        self.partner = Some(partner.into());
        self
    }
}

/// Device and runtime details attached to every login request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentMetadata {
    /// Operating system and architecture.
    pub os_version: String,
    /// Device model.
    pub device_model: String,
    /// Local IP address, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Host application version.
    pub app_version: String,
    /// Dispatcher version.
    pub runtime_version: String,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Coarse location, when the host shares one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geolocation: Option<GeoLocation>,
}

/// Latitude/longitude pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
}

impl EnvironmentMetadata {
    /// Details discoverable from the process itself.
    pub fn detect(app_version: impl Into<String>) -> Self {
        Self {
            os_version: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            device_model: std::env::consts::FAMILY.to_string(),
            ip_address: None,
            app_version: app_version.into(),
            runtime_version: concat!("beacon/", env!("CARGO_PKG_VERSION")).to_string(),
            tags: Vec::new(),
            geolocation: None,
        }
    }
}

/// Body of `POST auth/token`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Identity fields.
    #[serde(flatten)]
    pub identity: AuthIdentity,
    /// Application secret.
    pub auth_secret: String,
    /// Session the login belongs to.
    pub session_id: SessionId,
    /// Environment fields.
    #[serde(flatten)]
    pub environment: EnvironmentMetadata,
    /// Challenge data plus answer, on the second step only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_mechanism: Option<AuthChallenge>,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("identity", &self.identity)
            .field("auth_secret", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("auth_mechanism", &self.auth_mechanism.is_some())
            .finish_non_exhaustive()
    }
}

/// Success body of `POST auth/token`.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Bearer token (a JWT).
    pub token: String,
    /// Per-session signing secret.
    pub secret: String,
    /// Second-step challenge, when the backend requires one.
    #[serde(default)]
    pub auth_mechanism: Option<AuthChallenge>,
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("token", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("auth_mechanism", &self.auth_mechanism)
            .finish()
    }
}

/// Successful outcome of a login step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Token and secret are in place.
    Authenticated,
    /// A second step is required; answer it with `complete_challenge`.
    ChallengeRequired(AuthChallenge),
}

/// Where the manager is in its login lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthPhase {
    /// No login attempted.
    #[default]
    Unauthenticated,
    /// First-step login in flight.
    Authenticating,
    /// Token and secret held.
    Authenticated,
    /// First step succeeded with a challenge.
    AwaitingChallenge,
    /// Challenge answer in flight.
    FinalAuthenticating,
    /// Last login failed and no usable token is held.
    Failed,
}

/// Token and signing secret for one request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token.
    pub token: String,
    /// Signing secret.
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials { <redacted> }")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
