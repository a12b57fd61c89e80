use serde::{Deserialize, Serialize};
use tracing::debug;

use super::DispatchSettings;

/// Configuration pushed by the collection service after authentication.
///
/// Every field is optional; only the fields present are applied. Keys follow
/// the service's naming rather than the local settings file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteConfig {
    /// Replacement base URL.
    pub rest_url: Option<String>,
    /// Attempts per batch.
    pub send_retries_on_failure: Option<u32>,
    /// Seconds between attempts.
    pub send_retry_interval_seconds: Option<u64>,
    /// Seconds before a partial batch is forced out.
    pub send_next_batch_wait_seconds: Option<u64>,
    /// Event batch size.
    pub events_per_send_attempt: Option<usize>,
    /// Log batch size.
    pub logs_per_send_attempt: Option<usize>,
    /// Telemetry batch size.
    pub telemetry_entries_per_send_attempt: Option<usize>,
    /// Storage batch size.
    pub storage_entries_per_send_attempt: Option<usize>,
    /// Prune age for acknowledged records, in hours (all kinds).
    pub prune_sent_items_older_than_hours: Option<u64>,
    /// Store capacity (all kinds).
    pub maximum_cached_items: Option<usize>,
    /// Keep acknowledged records locally.
    pub retain_local_after_sent: Option<bool>,
}

impl RemoteConfig {
    /// Merge the present fields into `settings`. Returns how many were applied.
    ///
    /// Zero batch sizes and zero retry counts are ignored.
    pub fn apply_to(&self, settings: &mut DispatchSettings) -> usize {
        let mut applied = 0;

        if let Some(url) = self.rest_url.as_ref().filter(|u| !u.is_empty()) {
            settings.rest_url = Some(url.clone());
            applied += 1;
        }
        if let Some(n) = self.send_retries_on_failure.filter(|n| *n > 0) {
            settings.retry_count = n;
            applied += 1;
        }
        if let Some(secs) = self.send_retry_interval_seconds {
            settings.retry_interval_ms = secs.saturating_mul(1000);
            applied += 1;
        }
        if let Some(secs) = self.send_next_batch_wait_seconds {
            settings.straggler_timeout_ms = secs.saturating_mul(1000);
            applied += 1;
        }

        let batch_sizes = [
            (self.events_per_send_attempt, &mut settings.events),
            (self.logs_per_send_attempt, &mut settings.logs),
            (self.telemetry_entries_per_send_attempt, &mut settings.telemetry),
            (self.storage_entries_per_send_attempt, &mut settings.storage),
        ];
        for (size, ks) in batch_sizes {
            if let Some(n) = size.filter(|n| *n > 0) {
                ks.batch_size = n;
                applied += 1;
            }
        }

        if let Some(hours) = self.prune_sent_items_older_than_hours {
            let secs = hours.saturating_mul(3600);
            settings.events.prune_older_than_secs = secs;
            settings.logs.prune_older_than_secs = secs;
            settings.telemetry.prune_older_than_secs = secs;
            settings.storage.prune_older_than_secs = secs;
            applied += 1;
        }
        if let Some(max) = self.maximum_cached_items {
            settings.events.max_cached_items = max;
            settings.logs.max_cached_items = max;
            settings.telemetry.max_cached_items = max;
            settings.storage.max_cached_items = max;
            applied += 1;
        }
        if let Some(retain) = self.retain_local_after_sent {
            settings.retain_after_sent = retain;
            applied += 1;
        }

        debug!(applied, "merged remote configuration");
        applied
    }
}
