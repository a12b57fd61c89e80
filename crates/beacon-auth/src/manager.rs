//! The authentication manager.
//!
//! Owns the token lifecycle:
//!
//! ```text
//! Unauthenticated ─▶ Authenticating ─┬─▶ Authenticated
//!                                    ├─▶ AwaitingChallenge ─▶ FinalAuthenticating ─▶ Authenticated
//!                                    └─▶ Failed
//! Authenticated ─▶ Authenticating   (any re-authentication)
//! ```
//!
//! Login attempts are serialized by an async mutex; state reads never wait
//! on a login in flight. Login calls never retry. Retry policy belongs to the
//! dispatch engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::SessionId;
use beacon_settings::{RemoteConfig, SettingsHandle};
use beacon_transport::codec::{self, Reply};
use beacon_transport::{HeaderList, Transport};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::errors::AuthError;
use crate::signing::signed_headers;
use crate::state::AuthState;
use crate::token::decode_expiration;
use crate::types::{
    AuthChallenge, AuthIdentity, AuthOutcome, AuthPhase, CHALLENGE_ANSWER_KEY, Credentials,
    EnvironmentMetadata, LoginRequest, LoginResponse,
};

/// Login endpoint, relative to `restUrl`.
pub const LOGIN_PATH: &str = "auth/token";
/// Remote configuration endpoint, relative to `restUrl`.
pub const CONFIG_PATH: &str = "storage/config";

/// Host hook consulted when re-authentication needs a fresh secret.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// A secret for `identity`, or `None` when none can be obtained.
    async fn obtain_secret(&self, identity: &AuthIdentity) -> Option<String>;
}

/// Holds credentials and performs (re-)authentication.
pub struct AuthManager {
    transport: Arc<dyn Transport>,
    settings: SettingsHandle,
    environment: EnvironmentMetadata,
    state: RwLock<AuthState>,
    login_lock: tokio::sync::Mutex<()>,
    secret_provider: RwLock<Option<Arc<dyn SecretProvider>>>,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    /// Manager with environment metadata detected from the process.
    pub fn new(transport: Arc<dyn Transport>, settings: SettingsHandle) -> Self {
        Self::with_environment(transport, settings, EnvironmentMetadata::detect("unknown"))
    }

    /// Manager with caller-supplied environment metadata.
    pub fn with_environment(
        transport: Arc<dyn Transport>,
        settings: SettingsHandle,
        environment: EnvironmentMetadata,
    ) -> Self {
        Self {
            transport,
            settings,
            environment,
            state: RwLock::new(AuthState::default()),
            login_lock: tokio::sync::Mutex::new(()),
            secret_provider: RwLock::new(None),
        }
    }

    /// Register the hook used by `reauthenticate(true)`.
    pub fn set_secret_provider(&self, provider: Arc<dyn SecretProvider>) {
        *self.secret_provider.write() = Some(provider);
    }

    // ── Login flows ─────────────────────────────────────────────────

    /// First-step login.
    ///
    /// With `new_session` a fresh session id is minted; otherwise the current
    /// one is kept. With `allow_challenge` a challenge in the response is
    /// kept for [`Self::complete_challenge`] and reported as
    /// [`AuthOutcome::ChallengeRequired`].
    #[tracing::instrument(skip_all, fields(app_id = %identity.app_id, new_session = new_session, allow_challenge = allow_challenge))]
    pub async fn authenticate(
        &self,
        identity: AuthIdentity,
        secret: impl Into<String>,
        new_session: bool,
        allow_challenge: bool,
    ) -> Result<AuthOutcome, AuthError> {
        let secret = secret.into();
        let _login = self.login_lock.lock().await;

        // identity and session are only stored once the login succeeds
        let session_id = match self.state.read().session_id.clone() {
            Some(current) if !new_session => current,
            _ => SessionId::new(),
        };

        let request = self.login_request(identity, secret, session_id, None);
        self.login(request, AuthPhase::Authenticating, allow_challenge)
            .await
    }

    /// Log in again with the established identity and session.
    ///
    /// With `obtain_new_secret` and a registered [`SecretProvider`], the hook
    /// is asked first and a `None` fails without touching the network.
    /// Otherwise the secret of the last successful login is reused. Never
    /// requests a challenge.
    #[tracing::instrument(skip_all, fields(obtain_new_secret = obtain_new_secret))]
    pub async fn reauthenticate(&self, obtain_new_secret: bool) -> Result<AuthOutcome, AuthError> {
        let (identity, retained, generation) = {
            let state = self.state.read();
            let identity = state.identity.clone().ok_or(AuthError::NotAuthenticated)?;
            (identity, state.auth_secret.clone(), state.generation)
        };

        let provider = self.secret_provider.read().clone();
        let secret = match provider.filter(|_| obtain_new_secret) {
            Some(provider) => provider.obtain_secret(&identity).await,
            None => retained,
        }
        .ok_or_else(|| {
            warn!("no secret available for re-authentication");
            AuthError::SecretUnavailable
        })?;

        let _login = self.login_lock.lock().await;

        let session_id = {
            let state = self.state.read();
            // another caller logged in while we waited for the lock
            if state.generation != generation && state.phase == AuthPhase::Authenticated {
                debug!("re-authentication already completed by a concurrent caller");
                return Ok(AuthOutcome::Authenticated);
            }
            state.session_id.clone().unwrap_or_else(SessionId::new)
        };

        let request = self.login_request(identity, secret, session_id, None);
        self.login(request, AuthPhase::Authenticating, false).await
    }

    /// Second step of a two-step login.
    ///
    /// The pending challenge is consumed whatever the outcome.
    #[tracing::instrument(skip_all)]
    pub async fn complete_challenge(&self, answer: &str) -> Result<AuthOutcome, AuthError> {
        if answer.trim().is_empty() {
            return Err(AuthError::ChallengeNotSupplied);
        }

        let _login = self.login_lock.lock().await;

        let (identity, secret, session_id, mut challenge) = {
            let mut state = self.state.write();
            let challenge = state.challenge.take().ok_or(AuthError::NoChallengePending)?;
            let identity = state.identity.clone().ok_or(AuthError::NotAuthenticated)?;
            let secret = state.auth_secret.clone().ok_or(AuthError::SecretUnavailable)?;
            let session_id = state.session_id.clone().unwrap_or_default();
            (identity, secret, session_id, challenge)
        };
        let _ = challenge.insert(CHALLENGE_ANSWER_KEY.to_string(), answer.to_string());

        let request = self.login_request(identity, secret, session_id, Some(challenge));
        self.login(request, AuthPhase::FinalAuthenticating, false)
            .await
    }

    /// Drop a pending challenge without answering it.
    pub fn abandon_challenge(&self) {
        let mut state = self.state.write();
        if state.challenge.take().is_some() {
            state.phase = if state.api_token.is_some() {
                AuthPhase::Authenticated
            } else {
                AuthPhase::Unauthenticated
            };
        }
    }

    fn login_request(
        &self,
        identity: AuthIdentity,
        auth_secret: String,
        session_id: SessionId,
        auth_mechanism: Option<AuthChallenge>,
    ) -> LoginRequest {
        LoginRequest {
            identity,
            auth_secret,
            session_id,
            environment: self.environment.clone(),
            auth_mechanism,
        }
    }

    /// One login round trip. Caller holds the login lock.
    async fn login(
        &self,
        request: LoginRequest,
        phase: AuthPhase,
        allow_challenge: bool,
    ) -> Result<AuthOutcome, AuthError> {
        let url = self
            .settings
            .endpoint(LOGIN_PATH)
            .ok_or(AuthError::EndpointUnset)?;
        let body = codec::encode(&request)?;

        self.state.write().phase = phase;

        let response = match self.transport.post(&url, &Vec::new(), body).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "login request failed");
                let mut state = self.state.write();
                state.phase = state.settled_phase();
                return Err(AuthError::Network(e));
            }
        };

        match codec::classify::<LoginResponse>(&response) {
            Reply::Success(login) => {
                let outcome = self.accept(request, login, allow_challenge);
                self.refresh_remote_config().await;
                Ok(outcome)
            }
            Reply::Rejected(rejection) => {
                warn!(status = response.status, message = %rejection.message, "login rejected");
                let mut state = self.state.write();
                state.clear_token();
                state.phase = AuthPhase::Failed;
                Err(AuthError::Rejected {
                    message: rejection.message,
                })
            }
            Reply::Corrupt(detail) => {
                warn!(status = response.status, %detail, "unrecognized login response");
                let mut state = self.state.write();
                state.phase = state.settled_phase();
                Err(AuthError::CorruptResponse(detail))
            }
        }
    }

    fn accept(&self, request: LoginRequest, login: LoginResponse, allow_challenge: bool) -> AuthOutcome {
        let expiration = decode_expiration(&login.token);
        let challenge = login
            .auth_mechanism
            .filter(|c| allow_challenge && !c.is_empty());

        let mut state = self.state.write();
        state.store_token(login.token, login.secret, expiration);
        state.identity = Some(request.identity);
        state.auth_secret = Some(request.auth_secret);
        state.session_id = Some(request.session_id);

        if let Some(challenge) = challenge {
            info!("login requires a second step");
            state.challenge = Some(challenge.clone());
            state.phase = AuthPhase::AwaitingChallenge;
            AuthOutcome::ChallengeRequired(challenge)
        } else {
            info!(expires_at = ?expiration, "authenticated");
            state.challenge = None;
            state.phase = AuthPhase::Authenticated;
            AuthOutcome::Authenticated
        }
    }

    /// Fetch and merge remote configuration. Failures are only logged.
    async fn refresh_remote_config(&self) {
        let Some(url) = self.settings.endpoint(CONFIG_PATH) else {
            return;
        };
        let headers = match self.prepare_headers("") {
            Ok(headers) => headers,
            Err(e) => {
                warn!(error = %e, "skipping remote configuration");
                return;
            }
        };
        match self.transport.get(&url, &headers).await {
            Ok(response) => match codec::classify::<RemoteConfig>(&response) {
                Reply::Success(remote) => {
                    let _ = self.settings.apply_remote(&remote);
                }
                Reply::Rejected(r) => {
                    warn!(message = %r.message, "remote configuration refused");
                }
                Reply::Corrupt(detail) => {
                    warn!(%detail, "unrecognized remote configuration");
                }
            },
            Err(e) => warn!(error = %e, "remote configuration fetch failed"),
        }
    }

    // ── Credentials ─────────────────────────────────────────────────

    /// Whether the token expires within `lead`. False when no expiration is
    /// known.
    pub fn token_expiring_soon(&self, lead: Duration) -> bool {
        let Some(expiration) = self.state.read().token_expiration else {
            return false;
        };
        let lead = chrono::Duration::from_std(lead).unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_add_signed(lead)
            .is_none_or(|deadline| deadline >= expiration)
    }

    /// Valid credentials, re-authenticating first when the token is missing
    /// or expires within `lead`.
    pub async fn credentials(&self, lead: Duration) -> Result<Credentials, AuthError> {
        let (current, recoverable) = {
            let state = self.state.read();
            (state.credentials(), state.identity.is_some())
        };

        match current {
            Some(creds) if !self.token_expiring_soon(lead) => return Ok(creds),
            Some(_) => info!("token expiring, re-authenticating"),
            None if recoverable => info!("no token held, re-authenticating"),
            None => return Err(AuthError::NotAuthenticated),
        }

        let _ = self.reauthenticate(false).await?;
        self.state
            .read()
            .credentials()
            .ok_or(AuthError::NotAuthenticated)
    }

    /// Authentication headers for a request carrying `body`.
    pub fn prepare_headers(&self, body: &str) -> Result<HeaderList, AuthError> {
        let creds = self
            .state
            .read()
            .credentials()
            .ok_or(AuthError::NotAuthenticated)?;
        let timestamp = Utc::now().timestamp_millis().to_string();
        Ok(signed_headers(&creds.token, &creds.secret, &timestamp, body))
    }

    /// [`Self::credentials`] followed by [`Self::prepare_headers`].
    pub async fn authorized_headers(&self, body: &str, lead: Duration) -> Result<HeaderList, AuthError> {
        let _ = self.credentials(lead).await?;
        self.prepare_headers(body)
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Current lifecycle phase.
    pub fn phase(&self) -> AuthPhase {
        self.state.read().phase
    }

    /// Current session, `None` before the first login.
    pub fn session_id(&self) -> Option<SessionId> {
        self.state.read().session_id.clone()
    }

    /// Whether a token is held.
    pub fn is_authenticated(&self) -> bool {
        self.state.read().api_token.is_some()
    }

    /// Expiration of the held token, when known.
    pub fn token_expiration(&self) -> Option<DateTime<Utc>> {
        self.state.read().token_expiration
    }

    /// Challenge awaiting an answer.
    pub fn pending_challenge(&self) -> Option<AuthChallenge> {
        self.state.read().challenge.clone()
    }

    /// Established identity.
    pub fn identity(&self) -> Option<AuthIdentity> {
        self.state.read().identity.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use beacon_settings::DispatchSettings;
    use beacon_transport::ReqwestTransport;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jwt(exp: i64) -> String {
        encode(
            &Header::default(),
            &serde_json::json!({ "exp": exp }),
            &EncodingKey::from_secret(b"server"),
        )
        .unwrap()
    }

    fn identity() -> AuthIdentity {
        AuthIdentity::new("app-1", "org-1", "dev-1")
    }

    fn manager(server: &MockServer) -> AuthManager {
        let settings = SettingsHandle::new(DispatchSettings {
            rest_url: Some(format!("{}/v1/", server.uri())),
            ..Default::default()
        });
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        AuthManager::new(Arc::new(transport), settings)
    }

    async fn mount_login(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/v1/auth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_config(server: &MockServer, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/v1/storage/config"))
            .respond_with(template)
            .mount(server)
            .await;
    }

    fn far_future() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn login_success_stores_token_and_expiration() {
        let server = MockServer::start().await;
        let token = jwt(far_future());
        mount_login(&server, serde_json::json!({"token": token, "secret": "api-sec"})).await;
        mount_config(&server, ResponseTemplate::new(200).set_body_json(serde_json::json!({}))).await;

        let auth = manager(&server);
        let outcome = auth.authenticate(identity(), "app-sec", true, false).await.unwrap();
        assert_eq!(outcome, AuthOutcome::Authenticated);
        assert_eq!(auth.phase(), AuthPhase::Authenticated);
        assert!(auth.is_authenticated());
        assert!(auth.token_expiration().is_some());
        assert!(!auth.token_expiring_soon(Duration::from_secs(60)));
        assert!(auth.token_expiring_soon(Duration::from_secs(7200)));
    }

    #[tokio::test]
    async fn invalid_secret_surfaces_backend_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/token"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"message": "Invalid app secret"})),
            )
            .mount(&server)
            .await;

        let auth = manager(&server);
        let result = auth.authenticate(identity(), "wrong", true, false).await;
        assert_matches!(result, Err(AuthError::Rejected { message }) if message == "Invalid app secret");
        assert!(!auth.is_authenticated());
        assert!(auth.token_expiration().is_none());
        assert!(!auth.token_expiring_soon(Duration::from_secs(60)));
        assert_eq!(auth.phase(), AuthPhase::Failed);
        assert_matches!(auth.prepare_headers(""), Err(AuthError::NotAuthenticated));
    }

    #[tokio::test]
    async fn corrupt_login_response() {
        let server = MockServer::start().await;
        mount_login(&server, serde_json::json!({"unexpected": true})).await;

        let auth = manager(&server);
        let result = auth.authenticate(identity(), "s", true, false).await;
        assert_matches!(result, Err(AuthError::CorruptResponse(_)));
        assert!(!auth.is_authenticated());
    }

    #[tokio::test]
    async fn unreachable_backend_is_network_error() {
        let settings = SettingsHandle::new(DispatchSettings {
            rest_url: Some("http://127.0.0.1:9/v1".into()),
            ..Default::default()
        });
        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        let auth = AuthManager::new(Arc::new(transport), settings);
        let result = auth.authenticate(identity(), "s", true, false).await;
        assert_matches!(result, Err(AuthError::Network(_)));
        assert_eq!(auth.phase(), AuthPhase::Failed);
    }

    #[tokio::test]
    async fn unset_endpoint_is_configuration_error() {
        let transport = ReqwestTransport::new(Duration::from_secs(1)).unwrap();
        let auth = AuthManager::new(Arc::new(transport), SettingsHandle::default());
        let result = auth.authenticate(identity(), "s", true, false).await;
        assert_matches!(result, Err(AuthError::EndpointUnset));
    }

    #[tokio::test]
    async fn undecodable_expiration_is_tolerated() {
        let server = MockServer::start().await;
        mount_login(&server, serde_json::json!({"token": "opaque", "secret": "s"})).await;

        let auth = manager(&server);
        assert!(auth.authenticate(identity(), "s", true, false).await.is_ok());
        assert!(auth.is_authenticated());
        assert!(auth.token_expiration().is_none());
        assert!(!auth.token_expiring_soon(Duration::from_secs(86_400)));
    }

    #[tokio::test]
    async fn reauthenticate_keeps_session() {
        let server = MockServer::start().await;
        mount_login(&server, serde_json::json!({"token": jwt(far_future()), "secret": "s"})).await;

        let auth = manager(&server);
        let _ = auth.authenticate(identity(), "app-sec", true, false).await.unwrap();
        let first = auth.session_id().unwrap();

        let _ = auth.reauthenticate(false).await.unwrap();
        assert_eq!(auth.session_id().unwrap(), first);

        let _ = auth.authenticate(identity(), "app-sec", false, false).await.unwrap();
        assert_eq!(auth.session_id().unwrap(), first);

        let _ = auth.authenticate(identity(), "app-sec", true, false).await.unwrap();
        assert_ne!(auth.session_id().unwrap(), first);

        // the reused session id and retained secret were sent
        let requests = server.received_requests().await.unwrap();
        let logins: Vec<serde_json::Value> = requests
            .iter()
            .filter(|r| r.url.path() == "/v1/auth/token")
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect();
        assert_eq!(logins.len(), 4);
        assert_eq!(logins[1]["sessionId"], first.as_str());
        assert_eq!(logins[1]["authSecret"], "app-sec");
        assert!(logins[1].get("authMechanism").is_none());
    }

    struct NoSecret;

    #[async_trait]
    impl SecretProvider for NoSecret {
        async fn obtain_secret(&self, _identity: &AuthIdentity) -> Option<String> {
            None
        }
    }

    struct Rotated;

    #[async_trait]
    impl SecretProvider for Rotated {
        async fn obtain_secret(&self, identity: &AuthIdentity) -> Option<String> {
            Some(format!("rotated-{}", identity.device_id))
        }
    }

    #[tokio::test]
    async fn secret_hook_none_fails_without_network() {
        let server = MockServer::start().await;
        mount_login(&server, serde_json::json!({"token": "t", "secret": "s"})).await;

        let auth = manager(&server);
        let _ = auth.authenticate(identity(), "app-sec", true, false).await.unwrap();
        auth.set_secret_provider(Arc::new(NoSecret));

        let before = server.received_requests().await.unwrap().len();
        let result = auth.reauthenticate(true).await;
        assert_matches!(result, Err(AuthError::SecretUnavailable));
        assert_eq!(server.received_requests().await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn secret_hook_supplies_new_secret() {
        let server = MockServer::start().await;
        mount_login(&server, serde_json::json!({"token": "t", "secret": "s"})).await;

        let auth = manager(&server);
        let _ = auth.authenticate(identity(), "app-sec", true, false).await.unwrap();
        auth.set_secret_provider(Arc::new(Rotated));

        Mock::given(method("POST"))
            .and(path("/v1/auth/token"))
            .and(body_partial_json(serde_json::json!({"authSecret": "rotated-dev-1"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "t2", "secret": "s2"})),
            )
            .with_priority(1)
            .expect(2)
            .mount(&server)
            .await;

        assert!(auth.reauthenticate(true).await.is_ok());
        // reauthenticate(false) ignores the hook and reuses the rotated secret
        assert!(auth.reauthenticate(false).await.is_ok());
    }

    #[tokio::test]
    async fn reauthenticate_before_login_is_not_authenticated() {
        let server = MockServer::start().await;
        let auth = manager(&server);
        assert_matches!(auth.reauthenticate(false).await, Err(AuthError::NotAuthenticated));
        assert_matches!(
            auth.credentials(Duration::from_secs(60)).await,
            Err(AuthError::NotAuthenticated)
        );
    }

    #[tokio::test]
    async fn challenge_flow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/token"))
            .and(body_partial_json(serde_json::json!({"authMechanism": {"answer": "1234"}})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "final", "secret": "s2"})),
            )
            .with_priority(1)
            .mount(&server)
            .await;
        mount_login(
            &server,
            serde_json::json!({
                "token": "first", "secret": "s1",
                "authMechanism": {"type": "pin", "prompt": "Enter your PIN"}
            }),
        )
        .await;

        let auth = manager(&server);
        let outcome = auth.authenticate(identity(), "app-sec", true, true).await.unwrap();
        assert_matches!(outcome, AuthOutcome::ChallengeRequired(c) if c["type"] == "pin");
        assert_eq!(auth.phase(), AuthPhase::AwaitingChallenge);

        assert_matches!(auth.complete_challenge("  ").await, Err(AuthError::ChallengeNotSupplied));
        assert!(auth.pending_challenge().is_some());

        let outcome = auth.complete_challenge("1234").await.unwrap();
        assert_eq!(outcome, AuthOutcome::Authenticated);
        assert_eq!(auth.phase(), AuthPhase::Authenticated);
        assert!(auth.pending_challenge().is_none());
        assert_matches!(auth.complete_challenge("1234").await, Err(AuthError::NoChallengePending));
    }

    #[tokio::test]
    async fn challenge_ignored_when_not_allowed() {
        let server = MockServer::start().await;
        mount_login(
            &server,
            serde_json::json!({"token": "t", "secret": "s", "authMechanism": {"type": "pin"}}),
        )
        .await;

        let auth = manager(&server);
        let outcome = auth.authenticate(identity(), "app-sec", true, false).await.unwrap();
        assert_eq!(outcome, AuthOutcome::Authenticated);
        assert!(auth.pending_challenge().is_none());
    }

    #[tokio::test]
    async fn abandon_challenge_clears_it() {
        let server = MockServer::start().await;
        mount_login(
            &server,
            serde_json::json!({"token": "t", "secret": "s", "authMechanism": {"type": "pin"}}),
        )
        .await;

        let auth = manager(&server);
        let _ = auth.authenticate(identity(), "app-sec", true, true).await.unwrap();
        auth.abandon_challenge();
        assert!(auth.pending_challenge().is_none());
        assert_eq!(auth.phase(), AuthPhase::Authenticated);
    }

    #[tokio::test]
    async fn remote_config_applied_after_login() {
        let server = MockServer::start().await;
        mount_login(&server, serde_json::json!({"token": "t", "secret": "s"})).await;
        Mock::given(method("GET"))
            .and(path("/v1/storage/config"))
            .and(header_exists("x-beacon-signature"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"eventsPerSendAttempt": 4, "sendRetriesOnFailure": 1})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let auth = manager(&server);
        let _ = auth.authenticate(identity(), "app-sec", true, false).await.unwrap();
        let settings = auth.settings.snapshot();
        assert_eq!(settings.events.batch_size, 4);
        assert_eq!(settings.retry_count, 1);
    }

    #[tokio::test]
    async fn remote_config_failure_does_not_fail_login() {
        let server = MockServer::start().await;
        mount_login(&server, serde_json::json!({"token": "t", "secret": "s"})).await;
        mount_config(&server, ResponseTemplate::new(500).set_body_string("boom")).await;

        let auth = manager(&server);
        assert!(auth.authenticate(identity(), "app-sec", true, false).await.is_ok());
        assert_eq!(auth.settings.snapshot().events.batch_size, 16);
    }

    #[tokio::test]
    async fn credentials_refresh_expiring_token() {
        let server = MockServer::start().await;
        let soon = Utc::now().timestamp() + 10;
        Mock::given(method("POST"))
            .and(path("/v1/auth/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": jwt(soon), "secret": "s"})),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        mount_login(&server, serde_json::json!({"token": jwt(far_future()), "secret": "s2"})).await;

        let auth = manager(&server);
        let _ = auth.authenticate(identity(), "app-sec", true, false).await.unwrap();
        assert!(auth.token_expiring_soon(Duration::from_secs(60)));

        let creds = auth.credentials(Duration::from_secs(60)).await.unwrap();
        assert_eq!(creds.secret, "s2");
        assert!(!auth.token_expiring_soon(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn failed_login_keeps_established_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "t", "secret": "s"})),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/token"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({"message": "Invalid app secret"})),
            )
            .mount(&server)
            .await;

        let auth = manager(&server);
        let _ = auth.authenticate(identity(), "app-sec", true, false).await.unwrap();
        let first = auth.session_id().unwrap();

        let other = AuthIdentity::new("app-1", "org-1", "dev-2");
        assert!(auth.authenticate(other, "wrong", true, false).await.is_err());
        assert_eq!(auth.session_id(), Some(first));
        assert_eq!(auth.identity().unwrap().device_id, "dev-1");
    }

    #[tokio::test]
    async fn failed_first_login_leaves_nothing_to_recover() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({"message": "no"})))
            .mount(&server)
            .await;

        let auth = manager(&server);
        assert!(auth.authenticate(identity(), "wrong", true, false).await.is_err());
        assert!(auth.session_id().is_none());
        assert_matches!(auth.reauthenticate(false).await, Err(AuthError::NotAuthenticated));
    }

    #[tokio::test]
    async fn reauthentication_clears_pending_challenge() {
        let server = MockServer::start().await;
        mount_login(
            &server,
            serde_json::json!({"token": "t", "secret": "s", "authMechanism": {"type": "pin"}}),
        )
        .await;

        let auth = manager(&server);
        let outcome = auth.authenticate(identity(), "app-sec", true, true).await.unwrap();
        assert_matches!(outcome, AuthOutcome::ChallengeRequired(_));

        assert_eq!(auth.reauthenticate(false).await.unwrap(), AuthOutcome::Authenticated);
        assert_eq!(auth.phase(), AuthPhase::Authenticated);
        assert!(auth.pending_challenge().is_none());
        assert_matches!(auth.complete_challenge("1234").await, Err(AuthError::NoChallengePending));
    }

    #[tokio::test]
    async fn prepare_headers_signs_body() {
        let server = MockServer::start().await;
        mount_login(&server, serde_json::json!({"token": "tok", "secret": "sec"})).await;

        let auth = manager(&server);
        let _ = auth.authenticate(identity(), "app-sec", true, false).await.unwrap();
        let headers = auth.prepare_headers(r#"{"data":[]}"#).unwrap();
        assert_eq!(headers[0].1, "Bearer tok");
        let ts = &headers[1].1;
        assert_eq!(headers[2].1, crate::signing::sign("tok", "sec", ts, r#"{"data":[]}"#));
    }
}
