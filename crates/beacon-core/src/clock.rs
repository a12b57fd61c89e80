//! Capture clock with a scoped "freeze" window.
//!
//! Records normally stamp themselves with the current time. Inside a
//! [`freeze`] window every record created on the same thread receives the
//! same timestamp, so a group of logically simultaneous records sorts
//! identically downstream. Windows nest; an inner window keeps the outer
//! window's instant.

use std::cell::Cell;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};

thread_local! {
    static FROZEN_AT: Cell<Option<DateTime<Utc>>> = const { Cell::new(None) };
}

/// Timestamp to stamp on a record created right now.
pub fn capture_now() -> DateTime<Utc> {
    FROZEN_AT.with(Cell::get).unwrap_or_else(Utc::now)
}

/// Whether a freeze window is active on this thread.
pub fn is_frozen() -> bool {
    FROZEN_AT.with(Cell::get).is_some()
}

/// Open a freeze window at the current time.
///
/// The window closes when the returned guard is dropped. The guard is not
/// `Send`: the window belongs to the thread that opened it.
#[must_use = "the freeze window closes as soon as the guard is dropped"]
pub fn freeze() -> FrozenClock {
    freeze_at(Utc::now())
}

/// Open a freeze window at an explicit instant.
///
/// If a window is already open the outer instant wins.
#[must_use = "the freeze window closes as soon as the guard is dropped"]
pub fn freeze_at(at: DateTime<Utc>) -> FrozenClock {
    let previous = FROZEN_AT.with(Cell::get);
    FROZEN_AT.with(|cell| cell.set(Some(previous.unwrap_or(at))));
    FrozenClock {
        previous,
        _not_send: PhantomData,
    }
}

/// Guard for an open freeze window. See [`freeze`].
#[derive(Debug)]
pub struct FrozenClock {
    previous: Option<DateTime<Utc>>,
    _not_send: PhantomData<*const ()>,
}

impl FrozenClock {
    /// The instant every record in this window receives.
    pub fn instant(&self) -> DateTime<Utc> {
        capture_now()
    }
}

impl Drop for FrozenClock {
    fn drop(&mut self) {
        let previous = self.previous;
        FROZEN_AT.with(|cell| cell.set(previous));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
