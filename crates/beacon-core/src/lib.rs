//! # beacon-core
//!
//! Foundation types for the beacon telemetry dispatcher.
//!
//! - **Records**: [`Record`] with per-kind payloads and the `synced`/`taken`
//!   flags the dispatcher works with
//! - **Branded IDs**: [`RecordId`], [`SessionId`]
//! - **Capture clock**: [`clock::freeze`] windows for identical timestamps
//! - **Errors**: the shared [`ErrorCategory`] taxonomy
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod clock;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod record;

pub use errors::ErrorCategory;
pub use ids::{RecordId, SessionId};
pub use record::{
    AiProxyPayload, EventPayload, KeepPolicy, LogLevel, LogPayload, Meta, Payload, Record,
    RecordKind, StoragePayload, StorageScope, TelemetryPayload,
};
