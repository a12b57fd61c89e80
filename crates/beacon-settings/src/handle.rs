//! Live, shared settings.
//!
//! The dispatcher reads its policy fresh at the start of every cycle, so
//! setters take effect on the next drain without restarting anything.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::RecordKind;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::types::{DispatchSettings, OverflowPolicy, RemoteConfig};

/// Cloneable handle to the process-wide [`DispatchSettings`].
#[derive(Clone, Debug, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<DispatchSettings>>,
}

impl SettingsHandle {
    /// Wrap already-loaded settings.
    pub fn new(settings: DispatchSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Owned copy of the current settings.
    pub fn snapshot(&self) -> DispatchSettings {
        self.inner.read().clone()
    }

    /// Read a single value without cloning the whole struct.
    pub fn read<R>(&self, f: impl FnOnce(&DispatchSettings) -> R) -> R {
        f(&self.inner.read())
    }

    /// Mutate in place under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut DispatchSettings) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Merge configuration received from the service.
    pub fn apply_remote(&self, remote: &RemoteConfig) -> usize {
        let applied = self.update(|s| remote.apply_to(s));
        if applied > 0 {
            info!(applied, "applied remote configuration");
        }
        applied
    }

    /// Full URL for an API path, `None` while no base URL is configured.
    pub fn endpoint(&self, path: &str) -> Option<String> {
        self.read(|s| s.endpoint(path))
    }

    // ── Setters ─────────────────────────────────────────────────────

    /// Replace the base URL. An empty string unsets it.
    pub fn set_rest_url(&self, url: impl Into<String>) {
        let url = url.into();
        debug!(%url, "rest url changed");
        self.update(|s| s.rest_url = (!url.is_empty()).then_some(url));
    }

    /// Attempts per batch.
    pub fn set_retry_count(&self, count: u32) {
        self.update(|s| s.retry_count = count);
    }

    /// Wait between attempts.
    pub fn set_retry_interval(&self, interval: Duration) {
        self.update(|s| s.retry_interval_ms = duration_ms(interval));
    }

    /// Age after which a partial batch is forced out.
    pub fn set_straggler_timeout(&self, timeout: Duration) {
        self.update(|s| s.straggler_timeout_ms = duration_ms(timeout));
    }

    /// Keep acknowledged records locally.
    pub fn set_retain_after_sent(&self, retain: bool) {
        self.update(|s| s.retain_after_sent = retain);
    }

    /// Backpressure policy.
    pub fn set_overflow_policy(&self, policy: OverflowPolicy) {
        self.update(|s| s.overflow_policy = policy);
    }

    /// Batch size for one kind. Ignored for zero or for unbuffered kinds.
    pub fn set_batch_size(&self, kind: RecordKind, size: usize) {
        if size == 0 {
            return;
        }
        self.update(|s| {
            if let Some(ks) = s.kind_mut(kind) {
                ks.batch_size = size;
            }
        });
    }

    /// Store capacity for one kind. 0 means unbounded.
    pub fn set_max_cached_items(&self, kind: RecordKind, max: usize) {
        self.update(|s| {
            if let Some(ks) = s.kind_mut(kind) {
                ks.max_cached_items = max;
            }
        });
    }

    /// Prune age for acknowledged records of one kind. Zero disables.
    pub fn set_prune_older_than(&self, kind: RecordKind, age: Duration) {
        self.update(|s| {
            if let Some(ks) = s.kind_mut(kind) {
                ks.prune_older_than_secs = age.as_secs();
            }
        });
    }
}

impl From<DispatchSettings> for SettingsHandle {
    fn from(settings: DispatchSettings) -> Self {
        Self::new(settings)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = SettingsHandle::default();
        let b = a.clone();
        a.set_retry_count(9);
        assert_eq!(b.snapshot().retry_count, 9);
    }

    #[test]
    fn setters_update_kind_settings() {
        let h = SettingsHandle::default();
        h.set_batch_size(RecordKind::Log, 4);
        h.set_max_cached_items(RecordKind::Telemetry, 10);
        h.set_prune_older_than(RecordKind::Event, Duration::from_secs(120));
        h.set_batch_size(RecordKind::AiProxy, 4);
        let s = h.snapshot();
        assert_eq!(s.logs.batch_size, 4);
        assert_eq!(s.telemetry.max_cached_items, 10);
        assert_eq!(s.events.prune_older_than_secs, 120);
    }

    #[test]
    fn zero_batch_size_is_ignored() {
        let h = SettingsHandle::default();
        h.set_batch_size(RecordKind::Event, 0);
        assert_eq!(h.read(|s| s.events.batch_size), 16);
    }

    #[test]
    fn empty_rest_url_unsets_endpoint() {
        let h = SettingsHandle::default();
        h.set_rest_url("https://collect.example.com/");
        assert_eq!(
            h.endpoint("collect/log").as_deref(),
            Some("https://collect.example.com/collect/log")
        );
        h.set_rest_url("");
        assert!(h.endpoint("collect/log").is_none());
    }

    #[test]
    fn durations_stored_as_millis() {
        let h = SettingsHandle::default();
        h.set_retry_interval(Duration::from_millis(1500));
        h.set_straggler_timeout(Duration::from_secs(10));
        let s = h.snapshot();
        assert_eq!(s.retry_interval_ms, 1500);
        assert_eq!(s.straggler_timeout_ms, 10_000);
    }

    #[test]
    fn apply_remote_counts_fields() {
        let h = SettingsHandle::default();
        let remote = RemoteConfig {
            events_per_send_attempt: Some(2),
            retain_local_after_sent: Some(true),
            ..Default::default()
        };
        assert_eq!(h.apply_remote(&remote), 2);
        assert_eq!(h.read(|s| s.events.batch_size), 2);
        assert!(h.read(|s| s.retain_after_sent));
    }
}
