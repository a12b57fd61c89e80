//! The top-level [`Beacon`] context.
//!
//! Owns the live settings, the authentication manager, the engine and the
//! lane workers. There are no globals: an application builds one `Beacon`
//! and shares it.

use std::path::Path;
use std::sync::Arc;

use beacon_auth::{AuthError, AuthIdentity, AuthManager, AuthOutcome, EnvironmentMetadata, SecretProvider};
use beacon_core::{KeepPolicy, LogLevel, Meta, Record, StorageScope};
use beacon_settings::{DispatchSettings, LoggingSettings, SettingsHandle, load_settings, load_settings_from_path};
use beacon_transport::{ReqwestTransport, Transport};
use tracing::info;

use crate::engine::{DispatchEngine, DrainReport};
use crate::errors::{DispatchError, DispatchResult};
use crate::sequencer::{Completion, CompletionCallback, Operation, TaskSequencer, Ticket};

/// Install the global `tracing` subscriber described by `settings`.
pub fn init_logging(settings: &LoggingSettings) {
    if settings.json {
        beacon_core::logging::init_json_subscriber(&settings.level);
    } else {
        beacon_core::logging::init_subscriber(&settings.level);
    }
}

/// Dispatcher context.
#[derive(Debug)]
pub struct Beacon {
    settings: SettingsHandle,
    auth: Arc<AuthManager>,
    engine: Arc<DispatchEngine>,
    sequencer: TaskSequencer,
}

impl Beacon {
    /// Dispatcher over HTTPS. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidSettings`] when validation fails or the HTTP
    /// client cannot be built.
    pub fn new(settings: DispatchSettings) -> DispatchResult<Self> {
        let transport = ReqwestTransport::new(settings.request_timeout())
            .map_err(|e| DispatchError::InvalidSettings(e.to_string()))?;
        Self::with_transport(settings, Arc::new(transport))
    }

    /// Dispatcher configured from a settings file and `BEACON_*` overrides.
    ///
    /// `None` reads [`beacon_settings::settings_path`]. Logging is left to
    /// the caller, see [`init_logging`].
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidSettings`] when the file cannot be read or
    /// parsed, or the merged settings fail validation.
    pub fn load(path: Option<&Path>) -> DispatchResult<Self> {
        let settings = path
            .map_or_else(load_settings, load_settings_from_path)
            .map_err(|e| DispatchError::InvalidSettings(e.to_string()))?;
        Self::new(settings)
    }

    /// Dispatcher over a caller-supplied transport.
    pub fn with_transport(
        settings: DispatchSettings,
        transport: Arc<dyn Transport>,
    ) -> DispatchResult<Self> {
        Self::with_environment(settings, transport, EnvironmentMetadata::detect("unknown"))
    }

    /// Dispatcher with explicit environment metadata for login requests.
    pub fn with_environment(
        settings: DispatchSettings,
        transport: Arc<dyn Transport>,
        environment: EnvironmentMetadata,
    ) -> DispatchResult<Self> {
        settings
            .validate()
            .map_err(|e| DispatchError::InvalidSettings(e.to_string()))?;

        let queue_capacity = settings.queue_capacity;
        let straggler_check = settings.straggler_check_interval();
        let settings = SettingsHandle::new(settings);
        let auth = Arc::new(AuthManager::with_environment(
            transport.clone(),
            settings.clone(),
            environment,
        ));
        let engine = Arc::new(DispatchEngine::new(transport, auth.clone(), settings.clone()));
        let sequencer = TaskSequencer::new(engine.clone(), queue_capacity, straggler_check);
        info!(queue_capacity, ?straggler_check, "dispatcher started");

        Ok(Self {
            settings,
            auth,
            engine,
            sequencer,
        })
    }

    /// Live settings. Changes apply from the next operation on.
    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// The authentication manager.
    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// The shared engine.
    pub fn engine(&self) -> &Arc<DispatchEngine> {
        &self.engine
    }

    // ── Authentication ──────────────────────────────────────────────

    /// Log in. See [`AuthManager::authenticate`].
    pub async fn authenticate(
        &self,
        identity: AuthIdentity,
        secret: impl Into<String>,
        new_session: bool,
        allow_challenge: bool,
    ) -> Result<AuthOutcome, AuthError> {
        self.auth
            .authenticate(identity, secret, new_session, allow_challenge)
            .await
    }

    /// Answer a pending two-step challenge.
    pub async fn complete_challenge(&self, answer: &str) -> Result<AuthOutcome, AuthError> {
        self.auth.complete_challenge(answer).await
    }

    /// Log in again with the established identity and session.
    pub async fn reauthenticate(&self, obtain_new_secret: bool) -> Result<AuthOutcome, AuthError> {
        self.auth.reauthenticate(obtain_new_secret).await
    }

    /// Register the hook consulted when the backend rejects credentials.
    pub fn set_secret_provider(&self, provider: Arc<dyn SecretProvider>) {
        self.auth.set_secret_provider(provider);
    }

    // ── Records ─────────────────────────────────────────────────────

    /// Queue an operation.
    pub fn submit(&self, operation: Operation, callback: Option<CompletionCallback>) -> Ticket {
        self.sequencer.submit(operation, callback)
    }

    /// Queue any record. Unbuffered kinds are sent immediately.
    pub fn add_record(&self, record: Record, callback: Option<CompletionCallback>) -> Ticket {
        self.submit(Operation::Enqueue(record), callback)
    }

    /// Record a named event.
    pub fn add_event(&self, name: impl Into<String>, meta: Meta) -> Ticket {
        self.add_record(Record::event(name, meta), None)
    }

    /// Record a log line.
    pub fn add_log(&self, level: LogLevel, text: impl Into<String>, meta: Meta) -> Ticket {
        self.add_record(Record::log(level, text, meta), None)
    }

    /// Record a telemetry sample.
    pub fn add_telemetry(&self, name: impl Into<String>, meta: Meta) -> Ticket {
        self.add_record(Record::telemetry(name, meta), None)
    }

    /// Write a storage entry.
    pub fn set_storage(
        &self,
        name: impl Into<String>,
        data: Vec<Meta>,
        scope: StorageScope,
        keep_policy: KeepPolicy,
    ) -> Ticket {
        self.add_record(Record::storage(name, data, scope, keep_policy), None)
    }

    /// Read a storage entry's values.
    ///
    /// # Errors
    ///
    /// [`DispatchError::StorageEntryNotFound`] when the entry is missing or
    /// empty.
    pub async fn get_storage(&self, name: &str, scope: StorageScope) -> DispatchResult<Vec<Meta>> {
        let ticket = self.submit(
            Operation::FetchStorage {
                name: name.to_string(),
                scope,
            },
            None,
        );
        match ticket.wait().await? {
            Completion::StorageEntries(values) => Ok(values),
            other => Err(unexpected(&other)),
        }
    }

    /// Delete a storage entry.
    pub async fn remove_storage(&self, name: &str, scope: StorageScope) -> DispatchResult<()> {
        let ticket = self.submit(
            Operation::RemoveStorage {
                name: name.to_string(),
                scope,
            },
            None,
        );
        match ticket.wait().await? {
            Completion::Removed => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the AI proxy and return its answer.
    pub async fn ai_proxy(
        &self,
        prompt: impl Into<String>,
        past_messages: Vec<String>,
        llm_provider: impl Into<String>,
    ) -> DispatchResult<String> {
        let record = Record::ai_proxy(prompt, past_messages, llm_provider);
        match self.submit(Operation::SendImmediate(record), None).wait().await? {
            Completion::Response(content) => Ok(content),
            other => Err(unexpected(&other)),
        }
    }

    /// Send everything buffered regardless of batch fill.
    pub async fn force_drain_all(&self) -> DispatchResult<Vec<DrainReport>> {
        self.sequencer.force_drain_all().await
    }

    /// Stop accepting work and wait for queued operations to finish.
    pub async fn shutdown(&self) {
        self.sequencer.shutdown().await;
        info!("dispatcher stopped");
    }
}

fn unexpected(completion: &Completion) -> DispatchError {
    DispatchError::CorruptResponse(format!("unexpected completion: {completion:?}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
