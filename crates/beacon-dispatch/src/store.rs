//! In-memory record store, one per buffered kind.
//!
//! Insertion order is arrival order. A record moves through three states:
//! eligible (`!taken && !synced`), taken (part of an in-flight batch) and
//! synced (acknowledged, awaiting eviction). [`RecordStore::take`] hands out
//! snapshots; the authoritative copy never leaves the store.
//!
//! Only acknowledged records are removed by retention and capacity policy.
//! Unsent records leave the store only through the explicit overflow policy
//! ([`RecordStore::evict_oldest_unsent`]) or [`RecordStore::remove`].

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use beacon_core::{Record, RecordId, RecordKind};
use beacon_settings::DispatchSettings;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Retention and capacity bounds, refreshed from settings each cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorePolicy {
    /// Store capacity. 0 means unbounded.
    pub max_cached_items: usize,
    /// Age past which acknowledged records are pruned. `None` disables.
    pub prune_older_than: Option<Duration>,
    /// Keep acknowledged records until they age out.
    pub retain_after_sent: bool,
}

impl StorePolicy {
    /// Policy for one kind under `settings`.
    pub fn for_kind(settings: &DispatchSettings, kind: RecordKind) -> Self {
        settings
            .kind(kind)
            .map_or_else(Self::default, |ks| Self {
                max_cached_items: ks.max_cached_items,
                prune_older_than: ks.prune_older_than(),
                retain_after_sent: settings.retain_after_sent,
            })
    }
}

/// Point-in-time counters for one store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Store kind.
    pub kind: RecordKind,
    /// Records held.
    pub len: usize,
    /// Records available to the next `take`.
    pub eligible: usize,
    /// Records in an in-flight batch.
    pub taken: usize,
    /// Records not yet acknowledged (eligible or taken).
    pub unsent: usize,
    /// Acknowledged records awaiting eviction.
    pub synced: usize,
}

/// Ordered store of records of one kind.
#[derive(Debug)]
pub struct RecordStore {
    kind: RecordKind,
    records: VecDeque<Record>,
    policy: StorePolicy,
}

impl RecordStore {
    /// Empty, unbounded store.
    pub fn new(kind: RecordKind) -> Self {
        Self::with_policy(kind, StorePolicy::default())
    }

    /// Empty store with explicit bounds.
    pub fn with_policy(kind: RecordKind, policy: StorePolicy) -> Self {
        Self {
            kind,
            records: VecDeque::new(),
            policy,
        }
    }

    /// Kind of records held.
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Current bounds.
    pub fn policy(&self) -> StorePolicy {
        self.policy
    }

    /// Replace the bounds; takes effect on the next policy application.
    pub fn set_policy(&mut self, policy: StorePolicy) {
        self.policy = policy;
    }

    /// Insert at the tail.
    pub fn append(&mut self, record: Record) -> &Record {
        self.records.push_back(record);
        &self.records[self.records.len() - 1]
    }

    /// Up to `n` eligible records in store order, marked taken.
    pub fn take(&mut self, n: usize) -> Vec<Record> {
        let mut batch = Vec::with_capacity(n.min(self.records.len()));
        for record in self.records.iter_mut().filter(|r| r.is_eligible()).take(n) {
            record.taken = true;
            batch.push(record.clone());
        }
        batch
    }

    /// Return taken records to the eligible pool. Returns how many changed.
    pub fn release(&mut self, ids: &[RecordId]) -> usize {
        let ids: HashSet<&RecordId> = ids.iter().collect();
        let mut released = 0;
        for record in self.records.iter_mut().filter(|r| r.taken && ids.contains(&r.id)) {
            record.taken = false;
            released += 1;
        }
        released
    }

    /// Flag records as acknowledged. Returns how many changed.
    pub fn mark_synced(&mut self, ids: &[RecordId]) -> usize {
        let ids: HashSet<&RecordId> = ids.iter().collect();
        let mut marked = 0;
        for record in self.records.iter_mut().filter(|r| !r.synced && ids.contains(&r.id)) {
            record.synced = true;
            record.taken = false;
            marked += 1;
        }
        marked
    }

    /// Drop acknowledged records per the retention mode.
    ///
    /// Without `retain_after_sent` every synced record goes. With it only
    /// synced records older than `prune_older_than` go, and none when no
    /// prune age is set.
    pub fn evict_acknowledged(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        if self.policy.retain_after_sent {
            if let Some(age) = self.policy.prune_older_than {
                self.records.retain(|r| !(r.synced && older_than(r, age, now)));
            }
        } else {
            self.records.retain(|r| !r.synced);
        }
        let evicted = before - self.records.len();
        if evicted > 0 {
            debug!(kind = %self.kind, evicted, "evicted acknowledged records");
        }
        evicted
    }

    /// [`Self::apply_capacity_policy_at`] with the current time.
    pub fn apply_capacity_policy(&mut self) -> usize {
        self.apply_capacity_policy_at(Utc::now())
    }

    /// Enforce `max_cached_items` and `prune_older_than` on synced records.
    ///
    /// Over capacity, the oldest synced records are removed until the store
    /// is within bound or no synced records remain. Unsynced records are
    /// never touched.
    pub fn apply_capacity_policy_at(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();

        if let Some(age) = self.policy.prune_older_than {
            self.records.retain(|r| !(r.synced && older_than(r, age, now)));
        }

        let limit = self.policy.max_cached_items;
        if limit > 0 && self.records.len() > limit {
            let mut excess = self.records.len() - limit;
            self.records.retain(|r| {
                if excess > 0 && r.synced {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }

        let evicted = before - self.records.len();
        if evicted > 0 {
            debug!(kind = %self.kind, evicted, "capacity policy evicted records");
        }
        evicted
    }

    /// Remove the `n` oldest eligible records. Taken records are skipped.
    pub fn evict_oldest_unsent(&mut self, n: usize) -> usize {
        let mut remaining = n;
        self.records.retain(|r| {
            if remaining > 0 && r.is_eligible() {
                remaining -= 1;
                false
            } else {
                true
            }
        });
        n - remaining
    }

    /// Remove one record by id.
    pub fn remove(&mut self, id: &RecordId) -> Option<Record> {
        let idx = self.records.iter().position(|r| &r.id == id)?;
        self.records.remove(idx)
    }

    /// Look up a record by id.
    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.records.iter().find(|r| &r.id == id)
    }

    /// Records in store order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records available to the next `take`.
    pub fn eligible_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_eligible()).count()
    }

    /// Records not yet acknowledged, taken or not.
    pub fn unsent_count(&self) -> usize {
        self.records.iter().filter(|r| !r.synced).count()
    }

    /// Acknowledged records still held.
    pub fn synced_count(&self) -> usize {
        self.records.iter().filter(|r| r.synced).count()
    }

    /// Counters snapshot.
    pub fn stats(&self) -> StoreStats {
        let taken = self.records.iter().filter(|r| r.taken).count();
        let synced = self.synced_count();
        StoreStats {
            kind: self.kind,
            len: self.records.len(),
            eligible: self.eligible_count(),
            taken,
            unsent: self.records.len() - synced,
            synced,
        }
    }
}

fn older_than(record: &Record, age: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(record.captured_at)
        .to_std()
        .is_ok_and(|elapsed| elapsed >= age)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::Meta;
    use beacon_core::clock::freeze_at;
    use proptest::prelude::*;

    fn store_with(n: usize) -> RecordStore {
        let mut store = RecordStore::new(RecordKind::Event);
        for i in 0..n {
            let _ = store.append(Record::event(format!("e{i}"), Meta::new()));
        }
        store
    }

    fn ids(records: &[Record]) -> Vec<RecordId> {
        records.iter().map(|r| r.id.clone()).collect()
    }

    fn names(store: &RecordStore) -> Vec<String> {
        store
            .iter()
            .map(|r| match &r.payload {
                beacon_core::Payload::Event(e) => e.name.clone(),
                _ => String::new(),
            })
            .collect()
    }

    #[test]
    fn take_returns_in_order_and_marks_taken() {
        let mut store = store_with(5);
        let batch = store.take(3);
        assert_eq!(batch.len(), 3);
        assert_eq!(store.eligible_count(), 2);
        let second = store.take(10);
        assert_eq!(second.len(), 2);
        assert!(store.take(1).is_empty());
        assert_ne!(batch[0].id, second[0].id);
    }

    #[test]
    fn taken_snapshot_does_not_alias_store() {
        let mut store = store_with(1);
        let mut batch = store.take(1);
        batch[0].synced = true;
        assert_eq!(store.synced_count(), 0);
    }

    #[test]
    fn release_makes_records_eligible_again() {
        let mut store = store_with(4);
        let batch = store.take(4);
        assert_eq!(store.eligible_count(), 0);
        assert_eq!(store.release(&ids(&batch[..2])), 2);
        assert_eq!(store.eligible_count(), 2);
        // released records come back ahead of later ones
        let again = store.take(1);
        assert_eq!(again[0].id, batch[0].id);
    }

    #[test]
    fn mark_synced_then_evict_without_retention() {
        let mut store = store_with(3);
        let batch = store.take(2);
        assert_eq!(store.mark_synced(&ids(&batch)), 2);
        assert_eq!(store.stats().taken, 0);
        assert_eq!(store.evict_acknowledged(Utc::now()), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.synced_count(), 0);
    }

    #[test]
    fn retained_records_pruned_by_age() {
        let old = Utc::now() - chrono::Duration::hours(2);
        let mut store = RecordStore::with_policy(
            RecordKind::Log,
            StorePolicy {
                max_cached_items: 0,
                prune_older_than: Some(Duration::from_secs(3600)),
                retain_after_sent: true,
            },
        );
        {
            let _frozen = freeze_at(old);
            let _ = store.append(Record::event("old", Meta::new()));
        }
        let _ = store.append(Record::event("new", Meta::new()));
        let batch = store.take(2);
        let _ = store.mark_synced(&ids(&batch));

        assert_eq!(store.evict_acknowledged(Utc::now()), 1);
        assert_eq!(names(&store), vec!["new"]);
    }

    #[test]
    fn retention_without_prune_age_keeps_everything() {
        let mut store = RecordStore::with_policy(
            RecordKind::Event,
            StorePolicy {
                retain_after_sent: true,
                ..Default::default()
            },
        );
        for i in 0..3 {
            let _ = store.append(Record::event(format!("e{i}"), Meta::new()));
        }
        let batch = store.take(3);
        let _ = store.mark_synced(&ids(&batch));
        assert_eq!(store.evict_acknowledged(Utc::now()), 0);
        assert_eq!(store.synced_count(), 3);
    }

    #[test]
    fn capacity_evicts_exactly_oldest_synced() {
        let n = 10;
        let mut store = store_with(n + 5);
        let batch = store.take(n + 5);
        let _ = store.mark_synced(&ids(&batch));
        // two unsynced records at the tail
        let _ = store.append(Record::event("u1", Meta::new()));
        let _ = store.append(Record::event("u2", Meta::new()));
        store.set_policy(StorePolicy {
            max_cached_items: n + 2,
            ..Default::default()
        });

        assert_eq!(store.apply_capacity_policy(), 5);
        assert_eq!(store.len(), n + 2);
        assert_eq!(store.unsent_count(), 2);
        let kept = names(&store);
        assert_eq!(kept.first().map(String::as_str), Some("e5"));
        assert!(kept.contains(&"u1".to_string()));
        assert!(kept.contains(&"u2".to_string()));
    }

    #[test]
    fn capacity_never_touches_unsynced() {
        let mut store = store_with(8);
        store.set_policy(StorePolicy {
            max_cached_items: 3,
            ..Default::default()
        });
        assert_eq!(store.apply_capacity_policy(), 0);
        assert_eq!(store.len(), 8);
    }

    #[test]
    fn capacity_prunes_old_synced_even_under_limit() {
        let old = Utc::now() - chrono::Duration::days(2);
        let mut store = RecordStore::with_policy(
            RecordKind::Telemetry,
            StorePolicy {
                max_cached_items: 100,
                prune_older_than: Some(Duration::from_secs(86_400)),
                retain_after_sent: true,
            },
        );
        {
            let _frozen = freeze_at(old);
            let _ = store.append(Record::event("old", Meta::new()));
        }
        let batch = store.take(1);
        let _ = store.mark_synced(&ids(&batch));
        assert_eq!(store.apply_capacity_policy(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn evict_oldest_unsent_skips_taken() {
        let mut store = store_with(4);
        let taken = store.take(1);
        assert_eq!(store.evict_oldest_unsent(2), 2);
        assert_eq!(names(&store), vec!["e0", "e3"]);
        assert!(store.get(&taken[0].id).is_some());
    }

    #[test]
    fn remove_by_id() {
        let mut store = store_with(3);
        let id = store.iter().nth(1).map(|r| r.id.clone()).unwrap();
        assert!(store.remove(&id).is_some());
        assert!(store.remove(&id).is_none());
        assert_eq!(names(&store), vec!["e0", "e2"]);
    }

    #[test]
    fn policy_from_settings() {
        let mut settings = DispatchSettings::default();
        settings.logs.max_cached_items = 7;
        settings.logs.prune_older_than_secs = 60;
        settings.retain_after_sent = true;
        let policy = StorePolicy::for_kind(&settings, RecordKind::Log);
        assert_eq!(policy.max_cached_items, 7);
        assert_eq!(policy.prune_older_than, Some(Duration::from_secs(60)));
        assert!(policy.retain_after_sent);
        assert_eq!(
            StorePolicy::for_kind(&settings, RecordKind::AiProxy),
            StorePolicy::default()
        );
    }

    proptest! {
        #[test]
        fn counters_stay_consistent(ops in proptest::collection::vec((0u8..5, 1usize..6), 1..60)) {
            let mut store = RecordStore::new(RecordKind::Event);
            let mut in_flight: Vec<RecordId> = Vec::new();
            for (op, n) in ops {
                match op {
                    0 => for _ in 0..n {
                        let _ = store.append(Record::event("e", Meta::new()));
                    },
                    1 => in_flight.extend(ids(&store.take(n))),
                    2 => {
                        let k = n.min(in_flight.len());
                        let done: Vec<RecordId> = in_flight.drain(..k).collect();
                        let _ = store.mark_synced(&done);
                    }
                    3 => {
                        let k = n.min(in_flight.len());
                        let failed: Vec<RecordId> = in_flight.drain(..k).collect();
                        let _ = store.release(&failed);
                    }
                    _ => {
                        let _ = store.evict_acknowledged(Utc::now());
                    }
                }
                let stats = store.stats();
                prop_assert_eq!(stats.len, stats.unsent + stats.synced);
                prop_assert_eq!(stats.unsent, stats.eligible + stats.taken);
                prop_assert_eq!(stats.taken, in_flight.len());
            }
        }

        #[test]
        fn capacity_only_removes_synced(total in 1usize..40, synced in 0usize..40, limit in 1usize..40) {
            let synced = synced.min(total);
            let mut store = store_with(total);
            let batch = store.take(synced);
            let _ = store.mark_synced(&ids(&batch));
            store.set_policy(StorePolicy { max_cached_items: limit, ..Default::default() });

            let unsent_before = store.unsent_count();
            let _ = store.apply_capacity_policy();
            prop_assert_eq!(store.unsent_count(), unsent_before);
            prop_assert!(store.len() <= limit.max(unsent_before));
        }
    }
}
