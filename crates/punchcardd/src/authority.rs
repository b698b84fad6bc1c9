//! Server-side cooldown authority.
//!
//! The only place that decides whether a punch is recorded. The cooldown
//! check, direction resolution and the attendance write for one worker run
//! inside that worker's critical section, so two concurrent punches (two
//! kiosks, or a kiosk and a phone) can never both pass the check. Punches
//! for different workers take different locks and proceed concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use punchcard_core::{plan_punch, CaptureMethod, CooldownCheck, CooldownWindow, Direction, WorkerId};
use tokio::sync::Mutex as AsyncMutex;

use crate::store::{Store, StoreError};

/// Per-worker cooldown state.
#[derive(Debug, Default)]
struct CooldownSlot {
    /// Whether `last_punch` has been loaded from the store yet.
    seeded: bool,
    last_punch: Option<DateTime<Utc>>,
}

/// Outcome of a punch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accepted {
        direction: Direction,
        record_id: String,
    },
    Rejected {
        remaining_seconds: u64,
    },
}

pub struct CooldownAuthority {
    store: Store,
    window: CooldownWindow,
    day_offset: FixedOffset,
    slots: Mutex<HashMap<WorkerId, Arc<AsyncMutex<CooldownSlot>>>>,
}

impl CooldownAuthority {
    pub fn new(store: Store, window: CooldownWindow, day_offset: FixedOffset) -> Self {
        Self {
            store,
            window,
            day_offset,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Calendar day of `now` in the shop's timezone.
    pub fn day_of(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.day_offset).date_naive()
    }

    fn slot(&self, worker_id: &WorkerId) -> Arc<AsyncMutex<CooldownSlot>> {
        // Held only for the map lookup, never across an await.
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(worker_id.clone()).or_default())
    }

    /// Drop the cached slot of a worker that no longer exists.
    pub fn forget(&self, worker_id: &WorkerId) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.remove(worker_id).is_some() {
            tracing::debug!(worker_id = %worker_id, "cooldown slot released");
        }
    }

    #[cfg(test)]
    pub(crate) fn slots_len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Accept or reject a punch for `worker_id` at `now`.
    ///
    /// On acceptance the attendance mutation is committed before the
    /// worker's lock is released.
    pub async fn try_accept_punch(
        &self,
        worker_id: &WorkerId,
        method: CaptureMethod,
        now: DateTime<Utc>,
    ) -> Result<Decision, StoreError> {
        let slot = self.slot(worker_id);
        let mut slot = slot.lock().await;

        if !slot.seeded {
            // Survive a daemon restart inside the window.
            slot.last_punch = self.store.last_punch_at(worker_id).await?;
            slot.seeded = true;
        }

        let check = self.window.check(slot.last_punch, now);
        if let CooldownCheck::Active { .. } = check {
            let remaining_seconds = check.remaining_seconds();
            tracing::info!(
                worker_id = %worker_id,
                method = %method,
                remaining_seconds,
                "punch rejected: cooldown active"
            );
            return Ok(Decision::Rejected { remaining_seconds });
        }

        let day = self.day_of(now);
        let records = self.store.records_for_day(worker_id, day).await?;
        let (direction, plan) = plan_punch(&records);
        let record_id = self
            .store
            .apply_punch(worker_id, day, &plan, method, now)
            .await?;
        slot.last_punch = Some(now);

        tracing::info!(
            worker_id = %worker_id,
            method = %method,
            %direction,
            record_id = %record_id,
            "punch accepted"
        );
        Ok(Decision::Accepted {
            direction,
            record_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use punchcard_core::{PunchPlan, Worker};

    fn t(hms: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2026-10-19T{hms}Z"))
            .unwrap()
            .with_timezone(&Utc)
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    async fn setup() -> (Arc<CooldownAuthority>, Store, Worker) {
        let store = Store::open_in_memory().await.unwrap();
        let worker = store.create_worker("Rahim", None, t("08:00:00")).await.unwrap();
        let authority = Arc::new(CooldownAuthority::new(
            store.clone(),
            CooldownWindow::default(),
            utc(),
        ));
        (authority, store, worker)
    }

    #[tokio::test]
    async fn test_cooldown_rejects_then_accepts() {
        let (authority, _store, w) = setup().await;

        let first = authority
            .try_accept_punch(&w.id, CaptureMethod::Rfid, t("09:00:00"))
            .await
            .unwrap();
        assert!(matches!(first, Decision::Accepted { direction: Direction::In, .. }));

        let second = authority
            .try_accept_punch(&w.id, CaptureMethod::Rfid, t("09:00:30"))
            .await
            .unwrap();
        assert_eq!(second, Decision::Rejected { remaining_seconds: 30 });

        let third = authority
            .try_accept_punch(&w.id, CaptureMethod::Rfid, t("09:01:01"))
            .await
            .unwrap();
        assert!(matches!(third, Decision::Accepted { direction: Direction::Out, .. }));
    }

    #[tokio::test]
    async fn test_rejection_does_not_touch_records() {
        let (authority, store, w) = setup().await;
        authority
            .try_accept_punch(&w.id, CaptureMethod::Face, t("09:00:00"))
            .await
            .unwrap();
        authority
            .try_accept_punch(&w.id, CaptureMethod::Face, t("09:00:10"))
            .await
            .unwrap();

        let records = store.records_for_day(&w.id, t("09:00:00").date_naive()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_open());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_punches_accept_exactly_one() {
        let (authority, store, w) = setup().await;
        let now = t("09:00:00");

        let a = {
            let authority = Arc::clone(&authority);
            let id = w.id.clone();
            tokio::spawn(async move { authority.try_accept_punch(&id, CaptureMethod::Face, now).await })
        };
        let b = {
            let authority = Arc::clone(&authority);
            let id = w.id.clone();
            tokio::spawn(async move { authority.try_accept_punch(&id, CaptureMethod::Rfid, now).await })
        };
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

        let accepted = [&a, &b]
            .iter()
            .filter(|d| matches!(d, Decision::Accepted { .. }))
            .count();
        assert_eq!(accepted, 1, "a={a:?} b={b:?}");
        assert!([&a, &b]
            .iter()
            .any(|d| **d == Decision::Rejected { remaining_seconds: 60 }));

        let records = store.records_for_day(&w.id, now.date_naive()).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_different_workers_are_independent() {
        let (authority, store, w1) = setup().await;
        let w2 = store.create_worker("Karim", None, t("08:00:00")).await.unwrap();
        let now = t("09:00:00");

        let (a, b) = tokio::join!(
            authority.try_accept_punch(&w1.id, CaptureMethod::Face, now),
            authority.try_accept_punch(&w2.id, CaptureMethod::Face, now),
        );
        assert!(matches!(a.unwrap(), Decision::Accepted { .. }));
        assert!(matches!(b.unwrap(), Decision::Accepted { .. }));
    }

    #[tokio::test]
    async fn test_cooldown_seeded_from_store_after_restart() {
        let (_authority, store, w) = setup().await;
        store
            .apply_punch(&w.id, t("09:00:00").date_naive(), &PunchPlan::OpenRecord, CaptureMethod::Rfid, t("09:00:00"))
            .await
            .unwrap();

        // Fresh authority, as after a daemon restart.
        let authority = CooldownAuthority::new(store.clone(), CooldownWindow::default(), utc());
        let decision = authority
            .try_accept_punch(&w.id, CaptureMethod::Rfid, t("09:00:20"))
            .await
            .unwrap();
        assert_eq!(decision, Decision::Rejected { remaining_seconds: 40 });
    }

    #[tokio::test]
    async fn test_forget_releases_slot_without_weakening_cooldown() {
        let (authority, _store, w) = setup().await;
        authority
            .try_accept_punch(&w.id, CaptureMethod::Face, t("09:00:00"))
            .await
            .unwrap();
        assert_eq!(authority.slots_len(), 1);

        authority.forget(&w.id);
        assert_eq!(authority.slots_len(), 0);
        authority.forget(&w.id);

        // A recreated slot is reseeded from the store.
        let decision = authority
            .try_accept_punch(&w.id, CaptureMethod::Face, t("09:00:20"))
            .await
            .unwrap();
        assert_eq!(decision, Decision::Rejected { remaining_seconds: 40 });
    }

    #[tokio::test]
    async fn test_day_boundary_follows_offset() {
        let store = Store::open_in_memory().await.unwrap();
        let w = store.create_worker("Rahim", None, t("08:00:00")).await.unwrap();
        // UTC+6: 20:00Z on the 19th is already the 20th locally.
        let authority = CooldownAuthority::new(
            store.clone(),
            CooldownWindow::default(),
            FixedOffset::east_opt(6 * 3600).unwrap(),
        );
        let evening = t("20:00:00");
        assert_eq!(authority.day_of(evening), (evening + Duration::hours(6)).date_naive());

        // Open record yesterday-local does not make today's first punch a departure.
        authority
            .try_accept_punch(&w.id, CaptureMethod::Face, t("17:00:00"))
            .await
            .unwrap();
        let next = authority
            .try_accept_punch(&w.id, CaptureMethod::Face, evening)
            .await
            .unwrap();
        assert!(matches!(next, Decision::Accepted { direction: Direction::In, .. }));
    }
}
