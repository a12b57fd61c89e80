//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. `#[serde(default)]` on every struct
//! allows partial JSON: missing fields keep their default.

mod kind;
mod remote;

pub use kind::*;
pub use remote::*;

use std::time::Duration;

use beacon_core::RecordKind;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// What happens when a store already holds `maxCachedItems` unsent records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Refuse the new record and report a cache-full error to the producer.
    #[default]
    Reject,
    /// Evict the oldest unsent, untaken record to make room.
    DropOldestUnsent,
}

/// Root dispatch configuration.
///
/// # JSON Format
///
/// ```json
/// {
///   "restUrl": "https://collect.example.com/v1/",
///   "retryCount": 3,
///   "events": { "batchSize": 32 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Base URL of the collection service. Nothing is sent while unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest_url: Option<String>,
    /// Attempts per batch before giving up for the cycle.
    pub retry_count: u32,
    /// Wait between attempts after a transport failure, in milliseconds.
    pub retry_interval_ms: u64,
    /// Age after which a partial batch is forced out, in milliseconds.
    pub straggler_timeout_ms: u64,
    /// How often lanes check for stragglers, in milliseconds. 0 disables.
    pub straggler_check_interval_ms: u64,
    /// Keep acknowledged records locally until they age past the prune age.
    pub retain_after_sent: bool,
    /// Backpressure policy for unsent records.
    pub overflow_policy: OverflowPolicy,
    /// Re-authenticate this long before the token expires, in seconds.
    pub token_refresh_lead_secs: u64,
    /// Per-request timeout applied by the HTTP transport, in milliseconds.
    pub request_timeout_ms: u64,
    /// Capacity of each lane's submission queue.
    pub queue_capacity: usize,
    /// Event store settings.
    pub events: KindSettings,
    /// Log store settings.
    pub logs: KindSettings,
    /// Telemetry store settings.
    pub telemetry: KindSettings,
    /// Storage-entry store settings.
    pub storage: KindSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            rest_url: None,
            retry_count: 3,
            retry_interval_ms: 3_000,
            straggler_timeout_ms: 30_000,
            straggler_check_interval_ms: 5_000,
            retain_after_sent: false,
            overflow_policy: OverflowPolicy::Reject,
            token_refresh_lead_secs: 60,
            request_timeout_ms: 30_000,
            queue_capacity: 256,
            events: KindSettings::default(),
            logs: KindSettings::default(),
            telemetry: KindSettings::default(),
            storage: KindSettings {
                batching: BatchingMode::PerRecord,
                ..KindSettings::default()
            },
            logging: LoggingSettings::default(),
        }
    }
}

impl DispatchSettings {
    /// Settings for a buffered kind. `None` for [`RecordKind::AiProxy`].
    pub fn kind(&self, kind: RecordKind) -> Option<&KindSettings> {
        match kind {
            RecordKind::Event => Some(&self.events),
            RecordKind::Log => Some(&self.logs),
            RecordKind::Telemetry => Some(&self.telemetry),
            RecordKind::Storage => Some(&self.storage),
            RecordKind::AiProxy => None,
        }
    }

    /// Mutable settings for a buffered kind.
    pub fn kind_mut(&mut self, kind: RecordKind) -> Option<&mut KindSettings> {
        match kind {
            RecordKind::Event => Some(&mut self.events),
            RecordKind::Log => Some(&mut self.logs),
            RecordKind::Telemetry => Some(&mut self.telemetry),
            RecordKind::Storage => Some(&mut self.storage),
            RecordKind::AiProxy => None,
        }
    }

    /// Full URL for an API path, or `None` while `restUrl` is unset.
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let base = self.rest_url.as_deref()?.trim_end_matches('/');
        if base.is_empty() {
            return None;
        }
        Some(format!("{base}/{}", path.trim_start_matches('/')))
    }

    /// Attempts per batch, never less than one.
    pub fn attempts(&self) -> u32 {
        self.retry_count.max(1)
    }

    /// [`Self::retry_interval_ms`] as a duration.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// [`Self::straggler_timeout_ms`] as a duration.
    pub fn straggler_timeout(&self) -> Duration {
        Duration::from_millis(self.straggler_timeout_ms)
    }

    /// Straggler check period, `None` when periodic checks are disabled.
    pub fn straggler_check_interval(&self) -> Option<Duration> {
        (self.straggler_check_interval_ms > 0)
            .then(|| Duration::from_millis(self.straggler_check_interval_ms))
    }

    /// [`Self::token_refresh_lead_secs`] as a duration.
    pub fn token_refresh_lead(&self) -> Duration {
        Duration::from_secs(self.token_refresh_lead_secs)
    }

    /// [`Self::request_timeout_ms`] as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject values the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.rest_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(SettingsError::InvalidValue(format!(
                    "restUrl must be an http(s) URL, got {url:?}"
                )));
            }
        }
        if self.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "queueCapacity must be at least 1".into(),
            ));
        }
        for kind in RecordKind::BUFFERED {
            if let Some(ks) = self.kind(kind) {
                if ks.batch_size == 0 {
                    return Err(SettingsError::InvalidValue(format!(
                        "{kind}.batchSize must be at least 1"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`"trace"` … `"error"`); `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = DispatchSettings::default();
        assert!(s.rest_url.is_none());
        assert_eq!(s.retry_count, 3);
        assert_eq!(s.retry_interval(), Duration::from_secs(3));
        assert_eq!(s.straggler_timeout(), Duration::from_secs(30));
        assert_eq!(s.overflow_policy, OverflowPolicy::Reject);
        assert_eq!(s.storage.batching, BatchingMode::PerRecord);
        assert_eq!(s.events.batching, BatchingMode::Combined);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn kind_lookup() {
        let mut s = DispatchSettings::default();
        s.logs.batch_size = 7;
        assert_eq!(s.kind(RecordKind::Log).unwrap().batch_size, 7);
        assert!(s.kind(RecordKind::AiProxy).is_none());
        s.kind_mut(RecordKind::Storage).unwrap().max_cached_items = 3;
        assert_eq!(s.storage.max_cached_items, 3);
    }

    #[test]
    fn endpoint_joins_paths() {
        let mut s = DispatchSettings::default();
        assert_eq!(s.endpoint("collect/event"), None);
        s.rest_url = Some("https://collect.example.com/v1/".into());
        assert_eq!(
            s.endpoint("collect/event").as_deref(),
            Some("https://collect.example.com/v1/collect/event")
        );
        s.rest_url = Some("https://collect.example.com/v1".into());
        assert_eq!(
            s.endpoint("/auth/token").as_deref(),
            Some("https://collect.example.com/v1/auth/token")
        );
        s.rest_url = Some(String::new());
        assert_eq!(s.endpoint("x"), None);
    }

    #[test]
    fn attempts_never_zero() {
        let s = DispatchSettings {
            retry_count: 0,
            ..Default::default()
        };
        assert_eq!(s.attempts(), 1);
    }

    #[test]
    fn straggler_check_can_be_disabled() {
        let s = DispatchSettings {
            straggler_check_interval_ms: 0,
            ..Default::default()
        };
        assert!(s.straggler_check_interval().is_none());
    }

    #[test]
    fn validate_rejects_zero_batch() {
        let mut s = DispatchSettings::default();
        s.telemetry.batch_size = 0;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("telemetry.batchSize"));
    }

    #[test]
    fn validate_rejects_non_http_url() {
        let s = DispatchSettings {
            rest_url: Some("ftp://nope".into()),
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: DispatchSettings =
            serde_json::from_str(r#"{"retryCount": 5, "events": {"batchSize": 4}}"#).unwrap();
        assert_eq!(s.retry_count, 5);
        assert_eq!(s.events.batch_size, 4);
        assert_eq!(s.events.max_cached_items, KindSettings::default().max_cached_items);
        assert_eq!(s.storage.batching, BatchingMode::PerRecord);
    }
}
