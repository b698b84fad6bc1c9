//! Client-side cooldown mirror.
//!
//! An advisory cache of which workers the server most recently reported as
//! cooling down, plus a countdown for the most recently seen worker. It
//! exists to skip requests that are certain to be rejected and to drive the
//! countdown display. It is never a lock: entries expire by wall-clock
//! comparison alone, and the server re-checks every request it receives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use punchcard_core::WorkerId;
use tokio::sync::watch;

/// Countdown shown for the most recently punched or rejected worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    pub worker_id: WorkerId,
    pub ends_at: DateTime<Utc>,
}

impl Countdown {
    /// Whole seconds left at `now`, `None` once expired.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        remaining_until(self.ends_at, now)
    }
}

fn remaining_until(ends_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<u64> {
    let left = (ends_at - now).num_milliseconds();
    if left <= 0 {
        return None;
    }
    Some((left as u64).div_ceil(1000))
}

fn expiry(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX / 1000);
    now + chrono::Duration::seconds(secs.min(i64::MAX / 1000))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientMirror {
    cooling: HashMap<WorkerId, DateTime<Utc>>,
    countdown: Option<Countdown>,
}

impl ClientMirror {
    /// The server accepted a punch at `now`; the worker cools for `window`.
    pub fn note_accepted(&mut self, worker_id: &WorkerId, now: DateTime<Utc>, window: Duration) {
        self.set(worker_id, expiry(now, window.as_secs()));
    }

    /// The server rejected a punch with `remaining_seconds` left.
    pub fn note_rejected(&mut self, worker_id: &WorkerId, now: DateTime<Utc>, remaining_seconds: u64) {
        self.set(worker_id, expiry(now, remaining_seconds));
    }

    fn set(&mut self, worker_id: &WorkerId, ends_at: DateTime<Utc>) {
        self.cooling.insert(worker_id.clone(), ends_at);
        self.countdown = Some(Countdown {
            worker_id: worker_id.clone(),
            ends_at,
        });
    }

    /// Seconds the worker is believed to still be cooling at `now`.
    pub fn remaining(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> Option<u64> {
        self.cooling
            .get(worker_id)
            .and_then(|&ends_at| remaining_until(ends_at, now))
    }

    /// Active countdown at `now`, if any.
    pub fn countdown(&self, now: DateTime<Utc>) -> Option<(&WorkerId, u64)> {
        let countdown = self.countdown.as_ref()?;
        countdown
            .remaining_seconds(now)
            .map(|secs| (&countdown.worker_id, secs))
    }

    /// Drop expired entries. Returns true if anything changed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> bool {
        let before = self.cooling.len();
        self.cooling.retain(|_, ends_at| *ends_at > now);
        let countdown_expired = self
            .countdown
            .as_ref()
            .is_some_and(|c| c.ends_at <= now);
        if countdown_expired {
            self.countdown = None;
        }
        countdown_expired || self.cooling.len() != before
    }
}

/// Process-wide mirror with a single subscription point.
///
/// Outlives capture sessions: closing and reopening a session keeps the
/// cooldown picture, because cooldown belongs to the worker.
#[derive(Clone)]
pub struct SharedMirror {
    tx: Arc<watch::Sender<ClientMirror>>,
}

impl Default for SharedMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedMirror {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ClientMirror::default());
        Self { tx: Arc::new(tx) }
    }

    /// Receive every change, e.g. to drive a countdown display.
    pub fn subscribe(&self) -> watch::Receiver<ClientMirror> {
        self.tx.subscribe()
    }

    pub fn note_accepted(&self, worker_id: &WorkerId, now: DateTime<Utc>, window: Duration) {
        self.tx.send_modify(|m| m.note_accepted(worker_id, now, window));
    }

    pub fn note_rejected(&self, worker_id: &WorkerId, now: DateTime<Utc>, remaining_seconds: u64) {
        self.tx
            .send_modify(|m| m.note_rejected(worker_id, now, remaining_seconds));
    }

    pub fn remaining(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> Option<u64> {
        self.tx.borrow().remaining(worker_id, now)
    }

    /// Countdown snapshot at `now`.
    pub fn countdown(&self, now: DateTime<Utc>) -> Option<(WorkerId, u64)> {
        self.tx
            .borrow()
            .countdown(now)
            .map(|(id, secs)| (id.clone(), secs))
    }

    pub fn prune(&self, now: DateTime<Utc>) {
        self.tx.send_if_modified(|m| m.prune(now));
    }
}
