use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a batch is put on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchingMode {
    /// Every record of the batch in one request.
    #[default]
    Combined,
    /// One request per record.
    PerRecord,
}

/// Per-kind store and batching settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KindSettings {
    /// Records per batch; an eager drain waits until this many are eligible.
    pub batch_size: usize,
    /// Store capacity. 0 means unbounded.
    pub max_cached_items: usize,
    /// Age after which acknowledged records are pruned, in seconds. 0 disables.
    pub prune_older_than_secs: u64,
    /// Wire batching mode.
    pub batching: BatchingMode,
    /// When false, records are sent as soon as anything is eligible.
    pub persist: bool,
}

impl Default for KindSettings {
    fn default() -> Self {
        Self {
            batch_size: 16,
            max_cached_items: 1024,
            prune_older_than_secs: 0,
            batching: BatchingMode::Combined,
            persist: true,
        }
    }
}

impl KindSettings {
    /// Prune age as a duration, `None` when pruning is disabled.
    pub fn prune_older_than(&self) -> Option<Duration> {
        (self.prune_older_than_secs > 0).then(|| Duration::from_secs(self.prune_older_than_secs))
    }
}
