//! Debounce of per-tick identity matches.
//!
//! A single detection frame is noisy. An identity is only confirmed after
//! it has been matched on `threshold` consecutive ticks, each within
//! `window` of the previous one.

use std::time::{Duration, Instant};

use crate::types::WorkerId;

/// Maximum gap between two hits that still counts as consecutive.
pub const DEFAULT_STABILITY_WINDOW: Duration = Duration::from_millis(2000);
/// Consecutive hits required to confirm an identity.
pub const DEFAULT_STABILITY_THRESHOLD: u32 = 3;

/// Outcome of feeding one tick into the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Confirmed(WorkerId),
    /// Not yet stable; `consecutive` hits counted so far for the current identity.
    Pending { consecutive: u32 },
}

#[derive(Debug, Clone)]
pub struct StabilityFilter {
    window: Duration,
    threshold: u32,
    last_worker: Option<WorkerId>,
    last_seen: Option<Instant>,
    consecutive: u32,
}

impl Default for StabilityFilter {
    fn default() -> Self {
        Self::new(DEFAULT_STABILITY_WINDOW, DEFAULT_STABILITY_THRESHOLD)
    }
}

impl StabilityFilter {
    /// A `threshold` of zero is treated as one.
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self {
            window,
            threshold: threshold.max(1),
            last_worker: None,
            last_seen: None,
            consecutive: 0,
        }
    }

    /// Feed the match result of one detection tick.
    pub fn observe(&mut self, worker: Option<&WorkerId>, now: Instant) -> Observation {
        let Some(worker) = worker else {
            self.consecutive = 0;
            return Observation::Pending { consecutive: 0 };
        };

        let same_identity = self.last_worker.as_ref() == Some(worker);
        let within_window = self
            .last_seen
            .is_some_and(|last| now.saturating_duration_since(last) < self.window);

        if same_identity && within_window {
            self.consecutive += 1;
        } else {
            self.consecutive = 1;
            self.last_worker = Some(worker.clone());
        }
        self.last_seen = Some(now);

        if self.consecutive >= self.threshold {
            self.consecutive = 0;
            return Observation::Confirmed(worker.clone());
        }
        Observation::Pending {
            consecutive: self.consecutive,
        }
    }

    /// Forget all tracked state.
    pub fn reset(&mut self) {
        self.last_worker = None;
        self.last_seen = None;
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
