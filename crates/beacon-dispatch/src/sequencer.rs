//! Per-kind task sequencing.
//!
//! One bounded channel and one worker task per [`RecordKind`]. The worker
//! owns that kind's [`KindLane`], so operations on one kind run strictly
//! one at a time while different kinds proceed concurrently.
//!
//! Each submission reports its result exactly once to an optional callback
//! and to the returned [`Ticket`]. A full or closed queue resolves both
//! immediately.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::{Meta, Record, RecordKind, StorageScope};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::engine::{DispatchEngine, DrainReport, KindLane};
use crate::errors::{DispatchError, DispatchResult};
use crate::store::StoreStats;

/// Work a lane can run.
#[derive(Clone, Debug)]
pub enum Operation {
    /// Store a buffered record, then drain full batches.
    Enqueue(Record),
    /// Run a drain cycle.
    Drain {
        /// Lane to drain.
        kind: RecordKind,
        /// Only send full batches.
        eager: bool,
    },
    /// Send a partial batch that has waited past the straggler timeout.
    CheckStragglers(RecordKind),
    /// Send one record without storing it.
    SendImmediate(Record),
    /// Look up a storage entry.
    FetchStorage {
        /// Entry name.
        name: String,
        /// Device or user scope.
        scope: StorageScope,
    },
    /// Delete a storage entry.
    RemoveStorage {
        /// Entry name.
        name: String,
        /// Device or user scope.
        scope: StorageScope,
    },
    /// Report a lane's store counters.
    Inspect(RecordKind),
}

impl Operation {
    /// Lane that runs this operation.
    pub fn lane(&self) -> RecordKind {
        match self {
            Self::Enqueue(record) | Self::SendImmediate(record) => record.kind(),
            Self::Drain { kind, .. } | Self::CheckStragglers(kind) | Self::Inspect(kind) => *kind,
            Self::FetchStorage { .. } | Self::RemoveStorage { .. } => RecordKind::Storage,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Enqueue(_) => "enqueue",
            Self::Drain { .. } => "drain",
            Self::CheckStragglers(_) => "check_stragglers",
            Self::SendImmediate(_) => "send_immediate",
            Self::FetchStorage { .. } => "fetch_storage",
            Self::RemoveStorage { .. } => "remove_storage",
            Self::Inspect(_) => "inspect",
        }
    }
}

/// Successful result of an [`Operation`].
#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    /// Enqueue, drain and straggler checks.
    Drained(DrainReport),
    /// Body returned by an immediate send.
    Response(String),
    /// Values of a storage entry.
    StorageEntries(Vec<Meta>),
    /// A storage entry was deleted.
    Removed,
    /// Store counters.
    Stats(StoreStats),
}

/// Called exactly once with the operation's result.
pub type CompletionCallback = Box<dyn FnOnce(&DispatchResult<Completion>) + Send + 'static>;

struct Job {
    operation: Operation,
    callback: Option<CompletionCallback>,
    reply: oneshot::Sender<DispatchResult<Completion>>,
}

fn deliver(
    callback: Option<CompletionCallback>,
    reply: oneshot::Sender<DispatchResult<Completion>>,
    result: DispatchResult<Completion>,
) {
    if let Some(callback) = callback {
        // a panicking callback must not take the lane worker down with it
        if panic::catch_unwind(AssertUnwindSafe(|| callback(&result))).is_err() {
            warn!("completion callback panicked");
        }
    }
    let _ = reply.send(result);
}

/// Handle to a submission's eventual result.
#[derive(Debug)]
pub struct Ticket {
    rx: oneshot::Receiver<DispatchResult<Completion>>,
}

impl Ticket {
    /// Wait for the operation to finish.
    pub async fn wait(self) -> DispatchResult<Completion> {
        self.rx.await.unwrap_or(Err(DispatchError::SequencerClosed))
    }
}

/// Lane workers and their queues.
pub struct TaskSequencer {
    senders: Mutex<Option<BTreeMap<RecordKind, mpsc::Sender<Job>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TaskSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSequencer")
            .field("open", &self.senders.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl TaskSequencer {
    /// Spawn one worker per kind. Must be called inside a tokio runtime.
    ///
    /// `queue_capacity` bounds each lane's backlog. A `straggler_check`
    /// period enables periodic checks on buffered lanes.
    pub fn new(
        engine: Arc<DispatchEngine>,
        queue_capacity: usize,
        straggler_check: Option<Duration>,
    ) -> Self {
        let mut senders = BTreeMap::new();
        let mut workers = Vec::with_capacity(RecordKind::ALL.len());
        for kind in RecordKind::ALL {
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            let check = straggler_check.filter(|_| kind.is_buffered());
            workers.push(tokio::spawn(run_lane(
                engine.clone(),
                KindLane::new(kind),
                rx,
                check,
            )));
            let _ = senders.insert(kind, tx);
        }
        Self {
            senders: Mutex::new(Some(senders)),
            workers: Mutex::new(workers),
        }
    }

    /// Queue an operation on its lane.
    ///
    /// Never blocks. A full queue resolves with [`DispatchError::QueueFull`]
    /// and a shut-down sequencer with [`DispatchError::SequencerClosed`].
    pub fn submit(&self, operation: Operation, callback: Option<CompletionCallback>) -> Ticket {
        let kind = operation.lane();
        let sender = self
            .senders
            .lock()
            .as_ref()
            .and_then(|lanes| lanes.get(&kind).cloned());

        let (reply, rx) = oneshot::channel();
        let job = Job {
            operation,
            callback,
            reply,
        };
        let Some(sender) = sender else {
            return Self::refuse(job, DispatchError::SequencerClosed);
        };

        match sender.try_send(job) {
            Ok(()) => Ticket { rx },
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(%kind, "submission queue full");
                Self::refuse(job, DispatchError::QueueFull { kind })
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                Self::refuse(job, DispatchError::SequencerClosed)
            }
        }
    }

    fn refuse(job: Job, error: DispatchError) -> Ticket {
        let (reply, rx) = oneshot::channel();
        deliver(job.callback, reply, Err(error));
        Ticket { rx }
    }

    /// Drain every buffered kind regardless of batch fill.
    ///
    /// Event, Log, Telemetry and Storage are drained in that order. Every
    /// kind is attempted; the first failure is returned.
    pub async fn force_drain_all(&self) -> DispatchResult<Vec<DrainReport>> {
        let mut reports = Vec::with_capacity(RecordKind::BUFFERED.len());
        let mut first_error = None;
        for kind in RecordKind::BUFFERED {
            let ticket = self.submit(Operation::Drain { kind, eager: false }, None);
            match ticket.wait().await {
                Ok(Completion::Drained(report)) => reports.push(report),
                Ok(other) => debug!(%kind, ?other, "unexpected drain completion"),
                Err(e) => {
                    warn!(%kind, error = %e, "forced drain failed");
                    let _ = first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }

    /// Whether submissions are still accepted.
    pub fn is_open(&self) -> bool {
        self.senders.lock().is_some()
    }

    /// Close every queue and wait for the workers to finish queued work.
    pub async fn shutdown(&self) {
        let _ = self.senders.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "lane worker ended abnormally");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

async fn run_lane(
    engine: Arc<DispatchEngine>,
    mut lane: KindLane,
    mut rx: mpsc::Receiver<Job>,
    straggler_check: Option<Duration>,
) {
    let kind = lane.kind();
    let mut ticker = straggler_check.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });
    debug!(%kind, "lane worker started");

    loop {
        tokio::select! {
            job = rx.recv() => {
                let Some(Job { operation, callback, reply }) = job else { break };
                debug!(%kind, operation = operation.name(), "running operation");
                let result = perform(&engine, &mut lane, operation).await;
                deliver(callback, reply, result);
            }
            () = tick(&mut ticker) => {
                if let Err(e) = engine.check_stragglers(&mut lane).await {
                    warn!(%kind, error = %e, "straggler flush failed");
                }
            }
        }
    }
    debug!(%kind, "lane worker stopped");
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn perform(
    engine: &DispatchEngine,
    lane: &mut KindLane,
    operation: Operation,
) -> DispatchResult<Completion> {
    match operation {
        Operation::Enqueue(record) => engine.enqueue(lane, record).await.map(Completion::Drained),
        Operation::Drain { eager, .. } => engine.drain(lane, eager).await.map(Completion::Drained),
        Operation::CheckStragglers(_) => engine.check_stragglers(lane).await.map(Completion::Drained),
        Operation::SendImmediate(record) => engine.send_immediate(record).await.map(Completion::Response),
        Operation::FetchStorage { name, scope } => engine
            .fetch_storage(&name, scope)
            .await
            .map(Completion::StorageEntries),
        Operation::RemoveStorage { name, scope } => engine
            .remove_storage(&name, scope)
            .await
            .map(|()| Completion::Removed),
        Operation::Inspect(_) => Ok(Completion::Stats(lane.store.stats())),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
