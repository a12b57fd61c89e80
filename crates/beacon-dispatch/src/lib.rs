//! # beacon-dispatch
//!
//! Buffered, batched and retrying delivery of XR telemetry to a collection
//! backend.
//!
//! - [`RecordStore`]: ordered per-kind buffer with retention and capacity
//!   policy
//! - [`DispatchEngine`]: the batch-send loop, retries and re-authentication
//! - [`TaskSequencer`]: one worker per kind, callbacks and tickets
//! - [`Beacon`]: the context an application builds and shares
//!
//! ```text
//! Beacon ──submit──▶ TaskSequencer ──lane──▶ DispatchEngine ──▶ Transport
//!                                       │            │
//!                                   RecordStore   AuthManager
//! ```

#![deny(unsafe_code)]

pub mod client;
pub mod engine;
pub mod errors;
pub mod sequencer;
pub mod store;

pub use client::{Beacon, init_logging};
pub use engine::{DispatchEngine, DrainReport, KindLane, endpoint_path};
pub use errors::{DispatchError, DispatchResult};
pub use sequencer::{Completion, CompletionCallback, Operation, TaskSequencer, Ticket};
pub use store::{RecordStore, StorePolicy, StoreStats};
