//! Record model.
//!
//! A [`Record`] is one unit of telemetry: an event, a log line, a telemetry
//! sample, a storage entry or an AI-proxy request. The dispatcher only cares
//! about the identity, timestamp and the `synced`/`taken` flags; the payload
//! is carried through to the codec untouched.
//!
//! Records serialize to the backend's wire shape: identity and timestamp
//! fields followed by the payload fields, in camelCase. The local flags are
//! never serialized.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::capture_now;
use crate::ids::RecordId;

/// Free-form string metadata attached to records.
pub type Meta = BTreeMap<String, String>;

// ─────────────────────────────────────────────────────────────────────────────
// Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// The kind of a record, which selects its store, lane and endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    /// Interaction event.
    Event,
    /// Log line.
    Log,
    /// Telemetry sample.
    Telemetry,
    /// Key/value storage entry.
    Storage,
    /// Fire-and-forget AI proxy request. Never buffered.
    AiProxy,
}

impl RecordKind {
    /// Kinds that are buffered in a record store, in flush order.
    pub const BUFFERED: [Self; 4] = [Self::Event, Self::Log, Self::Telemetry, Self::Storage];

    /// Every kind, buffered kinds first.
    pub const ALL: [Self; 5] = [
        Self::Event,
        Self::Log,
        Self::Telemetry,
        Self::Storage,
        Self::AiProxy,
    ];

    /// Stable lowercase name, used in logs and settings keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Log => "log",
            Self::Telemetry => "telemetry",
            Self::Storage => "storage",
            Self::AiProxy => "ai_proxy",
        }
    }

    /// Whether records of this kind go through a record store.
    pub fn is_buffered(self) -> bool {
        !matches!(self, Self::AiProxy)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Interaction event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// Event name.
    pub name: String,
    /// Event metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Meta,
}

/// Severity of a log record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    /// Debug.
    Debug,
    /// Info.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
    /// Critical.
    Critical,
}

/// Log line payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    /// Severity.
    #[serde(rename = "logLevel")]
    pub level: LogLevel,
    /// Message text.
    pub text: String,
    /// Log metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Meta,
}

/// Telemetry sample payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    /// Sample name (e.g. `"headset_position"`).
    pub name: String,
    /// Sample values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Meta,
}

/// Who a storage entry belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageScope {
    /// Shared by every user of this device.
    #[default]
    Device,
    /// Belongs to the signed-in user.
    User,
}

impl StorageScope {
    /// Wire name of the scope.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::User => "user",
        }
    }
}

/// How the backend treats repeated writes to the same storage name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeepPolicy {
    /// Replace the previous value.
    #[default]
    KeepLatest,
    /// Keep every value ever written.
    AppendHistory,
}

/// Key/value storage entry payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePayload {
    /// Entry name.
    pub name: String,
    /// Entry data; always an array on the way out.
    pub data: Vec<Meta>,
    /// Owner scope.
    pub scope: StorageScope,
    /// Write policy.
    pub keep_policy: KeepPolicy,
}

/// AI proxy request payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiProxyPayload {
    /// Prompt text.
    pub prompt: String,
    /// Prior conversation turns, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub past_messages: Vec<String>,
    /// Which model provider the proxy should route to.
    pub llm_provider: String,
}

/// Kind-specific record contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// See [`EventPayload`].
    Event(EventPayload),
    /// See [`LogPayload`].
    Log(LogPayload),
    /// See [`TelemetryPayload`].
    Telemetry(TelemetryPayload),
    /// See [`StoragePayload`].
    Storage(StoragePayload),
    /// See [`AiProxyPayload`].
    AiProxy(AiProxyPayload),
}

impl Payload {
    /// Kind implied by the payload variant.
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Event(_) => RecordKind::Event,
            Self::Log(_) => RecordKind::Log,
            Self::Telemetry(_) => RecordKind::Telemetry,
            Self::Storage(_) => RecordKind::Storage,
            Self::AiProxy(_) => RecordKind::AiProxy,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// A single telemetry record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique identifier, generated at construction.
    pub id: RecordId,
    /// Optional back-reference to a related record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RecordId>,
    /// Capture timestamp (see [`crate::clock`]).
    #[serde(rename = "timestamp")]
    pub captured_at: DateTime<Utc>,
    /// Acknowledged by the backend.
    #[serde(skip)]
    pub synced: bool,
    /// Part of an in-flight batch.
    #[serde(skip)]
    pub taken: bool,
    /// Kind-specific payload.
    #[serde(flatten)]
    pub payload: Payload,
}

impl Record {
    /// Build a record around a payload, stamped by the capture clock.
    pub fn new(payload: Payload) -> Self {
        Self {
            id: RecordId::new(),
            parent_id: None,
            captured_at: capture_now(),
            synced: false,
            taken: false,
            payload,
        }
    }

    /// Interaction event.
    pub fn event(name: impl Into<String>, meta: Meta) -> Self {
        Self::new(Payload::Event(EventPayload {
            name: name.into(),
            meta,
        }))
    }

    /// Log line.
    pub fn log(level: LogLevel, text: impl Into<String>, meta: Meta) -> Self {
        Self::new(Payload::Log(LogPayload {
            level,
            text: text.into(),
            meta,
        }))
    }

    /// Telemetry sample.
    pub fn telemetry(name: impl Into<String>, meta: Meta) -> Self {
        Self::new(Payload::Telemetry(TelemetryPayload {
            name: name.into(),
            meta,
        }))
    }

    /// Storage entry.
    pub fn storage(
        name: impl Into<String>,
        data: Vec<Meta>,
        scope: StorageScope,
        keep_policy: KeepPolicy,
    ) -> Self {
        Self::new(Payload::Storage(StoragePayload {
            name: name.into(),
            data,
            scope,
            keep_policy,
        }))
    }

    /// AI proxy request.
    pub fn ai_proxy(
        prompt: impl Into<String>,
        past_messages: Vec<String>,
        llm_provider: impl Into<String>,
    ) -> Self {
        Self::new(Payload::AiProxy(AiProxyPayload {
            prompt: prompt.into(),
            past_messages,
            llm_provider: llm_provider.into(),
        }))
    }

    /// Attach a parent reference.
    #[must_use]
    pub fn with_parent(mut self, parent: RecordId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// Kind of this record.
    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }

    /// Not taken by an in-flight batch and not yet acknowledged.
    pub fn is_eligible(&self) -> bool {
        !self.taken && !self.synced
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
