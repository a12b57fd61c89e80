//! JSON codec for the collection service.
//!
//! Outgoing records are wrapped as `{"data": [...]}`. Incoming bodies are
//! tried against the expected success schema first and the rejection schema
//! second; [`classify`] reports which one matched.
//!
//! The service sometimes returns a single object where a list is expected.
//! [`OneOrMany`] accepts both and normalizes to a `Vec`.

use beacon_core::{Meta, Record};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::CodecError;
use crate::http::HttpResponse;

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    data: &'a [T],
}

/// Status token of an acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// `"ok"`.
    Ok,
    /// `"success"`.
    Success,
}

/// Success body for collect and storage writes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Always `ok` or `success`; anything else is not an acknowledgement.
    pub status: AckStatus,
}

/// Failure body: the backend's human-readable reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Reason text. Some endpoints call it `error`.
    #[serde(alias = "error")]
    pub message: String,
}

/// Success body of the AI proxy endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiProxyReply {
    /// Generated text.
    pub content: String,
}

/// Success body of a storage lookup. `data` may be one entry or many.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageReply {
    /// Stored values, oldest first.
    pub data: OneOrMany<Meta>,
}

/// A value the service sends either bare or wrapped in an array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// Several values.
    Many(Vec<T>),
    /// A single value.
    One(T),
}

impl<T> OneOrMany<T> {
    /// Normalize to a list.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Encode / decode
// ─────────────────────────────────────────────────────────────────────────────

/// Serialize any value.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Encode a batch as `{"data": [record, ...]}`.
pub fn encode_batch(records: &[Record]) -> Result<String, CodecError> {
    encode(&Envelope { data: records })
}

/// Encode a single record as a one-element batch.
pub fn encode_record(record: &Record) -> Result<String, CodecError> {
    encode_batch(std::slice::from_ref(record))
}

/// Parse a body into `T`.
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T, CodecError> {
    serde_json::from_str(body).map_err(|e| CodecError::Decode(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Which schema a response matched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply<S> {
    /// 2xx status and the success schema.
    Success(S),
    /// The backend refused the request.
    Rejected(Rejection),
    /// Neither schema matched.
    Corrupt(String),
}

impl<S> Reply<S> {
    /// Transform the success value.
    pub fn map<T>(self, f: impl FnOnce(S) -> T) -> Reply<T> {
        match self {
            Self::Success(s) => Reply::Success(f(s)),
            Self::Rejected(r) => Reply::Rejected(r),
            Self::Corrupt(detail) => Reply::Corrupt(detail),
        }
    }
}

/// Statuses that reject credentials even when the body carries no reason.
const AUTH_STATUSES: [u16; 2] = [401, 403];

/// Classify a response against success schema `S` and [`Rejection`].
pub fn classify<S: DeserializeOwned>(response: &HttpResponse) -> Reply<S> {
    if response.is_success() {
        if let Ok(success) = decode::<S>(&response.body) {
            return Reply::Success(success);
        }
    }
    if let Ok(rejection) = decode::<Rejection>(&response.body) {
        return Reply::Rejected(rejection);
    }
    if AUTH_STATUSES.contains(&response.status) {
        return Reply::Rejected(Rejection {
            message: format!("HTTP {}", response.status),
        });
    }
    let mut snippet: String = response.body.chars().take(120).collect();
    if snippet.is_empty() {
        snippet.push_str("<empty body>");
    }
    Reply::Corrupt(format!("HTTP {}: {snippet}", response.status))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
