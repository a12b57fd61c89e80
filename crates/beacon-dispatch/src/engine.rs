//! The dispatch engine: batching, retry, re-authentication and pruning.
//!
//! The engine itself is stateless and shared; per-kind state lives in a
//! [`KindLane`] owned by that kind's sequencer worker, so no two cycles
//! ever run against the same store at once.
//!
//! Every attempt classifies the reply:
//!
//! | Reply | Action |
//! |---|---|
//! | transport failure | wait `retryInterval`, retry |
//! | success shape | mark synced, evict, continue |
//! | rejection shape | re-authenticate; on failure abort, else retry at once |
//! | neither | abort with a corrupt-response error |
//!
//! Records of a failed batch that were not acknowledged are released back
//! to the eligible pool.

use std::sync::Arc;

use beacon_auth::AuthManager;
use beacon_core::{Meta, Record, RecordId, RecordKind, StorageScope};
use beacon_settings::{BatchingMode, DispatchSettings, OverflowPolicy, SettingsHandle};
use beacon_transport::codec::{self, Acknowledgement, AiProxyReply, Reply, StorageReply};
use beacon_transport::{HttpResponse, Method, Transport, TransportError, with_query};
use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{DispatchError, DispatchResult};
use crate::store::{RecordStore, StorePolicy};

/// Storage entry endpoint.
pub const STORAGE_PATH: &str = "storage";
/// AI proxy endpoint.
pub const AI_PROXY_PATH: &str = "services/llm";

/// Collection endpoint for a kind, relative to `restUrl`.
pub fn endpoint_path(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Event => "collect/event",
        RecordKind::Log => "collect/log",
        RecordKind::Telemetry => "collect/telemetry",
        RecordKind::Storage => STORAGE_PATH,
        RecordKind::AiProxy => AI_PROXY_PATH,
    }
}

type Classifier<S> = fn(&HttpResponse) -> Reply<S>;

/// Outcome of a drain cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Lane drained.
    pub kind: RecordKind,
    /// Records acknowledged during the cycle.
    pub sent: usize,
    /// Batches fully acknowledged during the cycle.
    pub batches: usize,
}

impl DrainReport {
    /// Nothing sent.
    pub fn empty(kind: RecordKind) -> Self {
        Self {
            kind,
            sent: 0,
            batches: 0,
        }
    }
}

/// Per-kind state owned by one sequencer worker.
#[derive(Debug)]
pub struct KindLane {
    /// Records of this kind.
    pub store: RecordStore,
    /// Last time a batch was acknowledged or a cycle found nothing to send.
    pub last_successful_send: Instant,
    /// A partial batch is waiting for the straggler timeout.
    pub straggler_armed: bool,
}

impl KindLane {
    /// Fresh lane with an empty store.
    pub fn new(kind: RecordKind) -> Self {
        Self {
            store: RecordStore::new(kind),
            last_successful_send: Instant::now(),
            straggler_armed: false,
        }
    }

    /// Lane kind.
    pub fn kind(&self) -> RecordKind {
        self.store.kind()
    }

    fn complete_cycle(&mut self) {
        self.last_successful_send = Instant::now();
        self.straggler_armed = false;
    }
}

/// Ids of a batch split by outcome.
struct BatchOutcome {
    acknowledged: Vec<RecordId>,
    result: DispatchResult<()>,
}

/// Shared delivery logic for every lane.
pub struct DispatchEngine {
    transport: Arc<dyn Transport>,
    auth: Arc<AuthManager>,
    settings: SettingsHandle,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine").finish_non_exhaustive()
    }
}

impl DispatchEngine {
    /// Engine over a transport and an authentication manager.
    pub fn new(
        transport: Arc<dyn Transport>,
        auth: Arc<AuthManager>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            transport,
            auth,
            settings,
        }
    }

    /// The authentication manager used for credentials and re-auth.
    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    // ── Buffered path ───────────────────────────────────────────────

    /// Store a record, apply retention and overflow policy, then drain
    /// eagerly.
    ///
    /// # Errors
    ///
    /// [`DispatchError::CacheFull`] when the store holds `maxCachedItems`
    /// unsent records under [`OverflowPolicy::Reject`]. The
    /// record is not stored. Otherwise any failure of the eager drain; the
    /// record stays stored in that case.
    #[tracing::instrument(skip_all, fields(kind = %lane.kind()))]
    pub async fn enqueue(&self, lane: &mut KindLane, record: Record) -> DispatchResult<DrainReport> {
        let settings = self.settings.snapshot();
        let kind = lane.kind();
        let Some(ks) = settings.kind(kind) else {
            let _ = self.send_immediate(record).await?;
            return Ok(DrainReport {
                kind,
                sent: 1,
                batches: 1,
            });
        };

        lane.store.set_policy(StorePolicy::for_kind(&settings, kind));

        let limit = ks.max_cached_items;
        if limit > 0 && lane.store.unsent_count() >= limit {
            let needed = lane.store.unsent_count() + 1 - limit;
            let evicted = match settings.overflow_policy {
                OverflowPolicy::Reject => 0,
                OverflowPolicy::DropOldestUnsent => {
                    lane.store.evict_oldest_unsent(needed)
                }
            };
            if evicted < needed {
                warn!(limit, unsent = lane.store.unsent_count(), "cache full, record refused");
                return Err(DispatchError::CacheFull { kind, limit });
            }
            warn!(evicted, limit, "cache full, oldest unsent records dropped");
        }

        let _ = lane.store.append(record);
        let _ = lane.store.apply_capacity_policy();
        lane.straggler_armed = true;
        self.drain(lane, true).await
    }

    /// The batch-send loop.
    ///
    /// Eager mode only sends full batches, unless the kind is not persisted.
    /// Non-eager mode sends whatever is eligible.
    #[tracing::instrument(skip_all, fields(kind = %lane.kind(), eager = eager))]
    pub async fn drain(&self, lane: &mut KindLane, eager: bool) -> DispatchResult<DrainReport> {
        let settings = self.settings.snapshot();
        let kind = lane.kind();
        let mut report = DrainReport::empty(kind);
        let Some(ks) = settings.kind(kind).cloned() else {
            return Ok(report);
        };
        lane.store.set_policy(StorePolicy::for_kind(&settings, kind));

        loop {
            if eager && ks.persist && lane.store.eligible_count() < ks.batch_size {
                break;
            }

            let batch = lane.store.take(ks.batch_size);
            if batch.is_empty() {
                lane.complete_cycle();
                break;
            }
            debug!(size = batch.len(), "sending batch");

            let outcome = match ks.batching {
                BatchingMode::Combined => self.deliver_combined(&settings, kind, &batch).await,
                BatchingMode::PerRecord => self.deliver_each(&settings, kind, &batch).await,
            };

            let acknowledged = lane.store.mark_synced(&outcome.acknowledged);
            if acknowledged > 0 {
                lane.last_successful_send = Instant::now();
                report.sent += acknowledged;
            }
            let _ = lane.store.evict_acknowledged(Utc::now());
            let _ = lane.store.apply_capacity_policy();

            if let Err(e) = outcome.result {
                let failed: Vec<RecordId> = batch
                    .iter()
                    .filter(|r| !outcome.acknowledged.contains(&r.id))
                    .map(|r| r.id.clone())
                    .collect();
                let released = lane.store.release(&failed);
                warn!(error = %e, released, "batch failed, records released");
                lane.straggler_armed = lane.store.eligible_count() > 0;
                return Err(e);
            }
            report.batches += 1;
        }

        lane.straggler_armed = lane.straggler_armed && lane.store.eligible_count() > 0;
        if report.sent > 0 {
            info!(sent = report.sent, batches = report.batches, "drain complete");
        }
        Ok(report)
    }

    /// Force out a partial batch that has waited past the straggler timeout.
    pub async fn check_stragglers(&self, lane: &mut KindLane) -> DispatchResult<DrainReport> {
        let timeout = self.settings.read(DispatchSettings::straggler_timeout);
        let due = lane.straggler_armed
            && lane.store.eligible_count() > 0
            && lane.last_successful_send.elapsed() >= timeout;
        if !due {
            return Ok(DrainReport::empty(lane.kind()));
        }
        debug!(kind = %lane.kind(), "straggler timeout reached");
        self.drain(lane, false).await
    }

    async fn deliver_combined(
        &self,
        settings: &DispatchSettings,
        kind: RecordKind,
        batch: &[Record],
    ) -> BatchOutcome {
        let result = match codec::encode_batch(batch) {
            Ok(body) => self.post_collect(settings, kind, body).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(_) => BatchOutcome {
                acknowledged: batch.iter().map(|r| r.id.clone()).collect(),
                result: Ok(()),
            },
            Err(e) => BatchOutcome {
                acknowledged: Vec::new(),
                result: Err(e),
            },
        }
    }

    /// One request per record, each with its own retry budget. Stops at the
    /// first record that fails.
    async fn deliver_each(
        &self,
        settings: &DispatchSettings,
        kind: RecordKind,
        batch: &[Record],
    ) -> BatchOutcome {
        let mut acknowledged = Vec::with_capacity(batch.len());
        for record in batch {
            let result = match codec::encode_record(record) {
                Ok(body) => self.post_collect(settings, kind, body).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(_) => acknowledged.push(record.id.clone()),
                Err(e) => {
                    return BatchOutcome {
                        acknowledged,
                        result: Err(e),
                    };
                }
            }
        }
        BatchOutcome {
            acknowledged,
            result: Ok(()),
        }
    }

    async fn post_collect(
        &self,
        settings: &DispatchSettings,
        kind: RecordKind,
        body: String,
    ) -> DispatchResult<Acknowledgement> {
        let url = endpoint_url(settings, endpoint_path(kind))?;
        self.exchange(settings, Method::Post, &url, body, codec::classify::<Acknowledgement>)
            .await
    }

    // ── Unbuffered path ─────────────────────────────────────────────

    /// Send one record without storing it and return the service's reply.
    ///
    /// AI proxy records return the generated content; other kinds return an
    /// empty string once acknowledged.
    #[tracing::instrument(skip_all, fields(kind = %record.kind()))]
    pub async fn send_immediate(&self, record: Record) -> DispatchResult<String> {
        let settings = self.settings.snapshot();
        let url = endpoint_url(&settings, endpoint_path(record.kind()))?;
        if record.kind() == RecordKind::AiProxy {
            let body = codec::encode(&record)?;
            let reply = self
                .exchange(&settings, Method::Post, &url, body, codec::classify::<AiProxyReply>)
                .await?;
            Ok(reply.content)
        } else {
            let body = codec::encode_record(&record)?;
            let _ = self
                .exchange(&settings, Method::Post, &url, body, codec::classify::<Acknowledgement>)
                .await?;
            Ok(String::new())
        }
    }

    /// Look up a stored entry's values.
    #[tracing::instrument(skip_all, fields(name = name, scope = scope.as_str()))]
    pub async fn fetch_storage(&self, name: &str, scope: StorageScope) -> DispatchResult<Vec<Meta>> {
        let settings = self.settings.snapshot();
        let url = storage_url(&settings, name, scope)?;
        let reply = self
            .exchange(&settings, Method::Get, &url, String::new(), classify_lookup)
            .await?;
        let values = reply.map(|r| r.data.into_vec()).unwrap_or_default();
        if values.is_empty() {
            return Err(DispatchError::StorageEntryNotFound {
                name: name.to_string(),
            });
        }
        Ok(values)
    }

    /// Delete a stored entry.
    #[tracing::instrument(skip_all, fields(name = name, scope = scope.as_str()))]
    pub async fn remove_storage(&self, name: &str, scope: StorageScope) -> DispatchResult<()> {
        let settings = self.settings.snapshot();
        let url = storage_url(&settings, name, scope)?;
        let found = self
            .exchange(&settings, Method::Delete, &url, String::new(), classify_delete)
            .await?;
        if found {
            Ok(())
        } else {
            Err(DispatchError::StorageEntryNotFound {
                name: name.to_string(),
            })
        }
    }

    // ── Shared plumbing ─────────────────────────────────────────────

    /// One request with the retry and re-authentication policy.
    async fn exchange<S>(
        &self,
        settings: &DispatchSettings,
        method: Method,
        url: &str,
        body: String,
        classify: Classifier<S>,
    ) -> DispatchResult<S> {
        let attempts = settings.attempts();
        let lead = settings.token_refresh_lead();
        let mut last_error = None;

        for attempt in 1..=attempts {
            let response = match self.auth.authorized_headers(&body, lead).await {
                Ok(headers) => self.transport.send(method, url, &headers, body.clone()).await,
                // a token refresh that never reached the backend is retried like a send
                Err(beacon_auth::AuthError::Network(e)) => Err(e),
                Err(e) => return Err(e.into()),
            };

            match response {
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "attempt failed");
                    last_error = Some(DispatchError::Network(e));
                    if attempt < attempts {
                        tokio::time::sleep(settings.retry_interval()).await;
                    }
                }
                Ok(response) => match classify(&response) {
                    Reply::Success(value) => {
                        debug!(attempt, status = response.status, "request acknowledged");
                        return Ok(value);
                    }
                    Reply::Rejected(rejection) => {
                        warn!(attempt, status = response.status, message = %rejection.message, "request rejected, re-authenticating");
                        if let Err(e) = self.auth.reauthenticate(true).await {
                            warn!(error = %e, "re-authentication failed");
                            return Err(e.into());
                        }
                        last_error = Some(DispatchError::Rejected {
                            message: rejection.message,
                        });
                    }
                    Reply::Corrupt(detail) => {
                        warn!(attempt, %detail, "unrecognized response");
                        return Err(DispatchError::CorruptResponse(detail));
                    }
                },
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DispatchError::Network(TransportError::Network("no attempt made".to_string()))
        }))
    }
}

fn endpoint_url(settings: &DispatchSettings, path: &str) -> DispatchResult<String> {
    settings.endpoint(path).ok_or(DispatchError::EndpointUnset)
}

fn storage_url(settings: &DispatchSettings, name: &str, scope: StorageScope) -> DispatchResult<String> {
    let base = endpoint_url(settings, STORAGE_PATH)?;
    Ok(with_query(&base, &[("name", name), ("scope", scope.as_str())])?)
}

/// Storage lookup: 404 means no entry.
fn classify_lookup(response: &HttpResponse) -> Reply<Option<StorageReply>> {
    if response.status == 404 {
        return Reply::Success(None);
    }
    codec::classify::<StorageReply>(response).map(Some)
}

/// Storage delete: 404 means no entry; an empty 2xx body acknowledges.
fn classify_delete(response: &HttpResponse) -> Reply<bool> {
    if response.status == 404 {
        return Reply::Success(false);
    }
    if response.is_success() && response.body.trim().is_empty() {
        return Reply::Success(true);
    }
    codec::classify::<Acknowledgement>(response).map(|_| true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
