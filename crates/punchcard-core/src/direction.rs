//! Arrival/departure resolution from the punches already recorded today.

use crate::types::{AttendanceRecord, Direction};

/// Decide whether the next punch is an arrival or a departure.
///
/// Counts individual punches across today's records: an even count means
/// the worker is out and the next punch is `In`.
pub fn resolve_direction(records_today: &[AttendanceRecord]) -> Direction {
    let punches: usize = records_today.iter().map(AttendanceRecord::punch_count).sum();
    if punches % 2 == 0 {
        Direction::In
    } else {
        Direction::Out
    }
}

/// Storage mutation that applies a resolved punch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunchPlan {
    /// Create a new record for today with `check_in = now`.
    OpenRecord,
    /// Set `check_out = now` on the given open record.
    CloseRecord { record_id: String },
    /// Departure with no open record to close; write a check-out-only
    /// record and flag it for reconciliation.
    OrphanCheckOut,
}

/// Resolve the direction and choose the mutation that applies it.
pub fn plan_punch(records_today: &[AttendanceRecord]) -> (Direction, PunchPlan) {
    match resolve_direction(records_today) {
        Direction::In => (Direction::In, PunchPlan::OpenRecord),
        Direction::Out => {
            // Most recent open record by check-in time.
            let open = records_today
                .iter()
                .filter(|r| r.is_open())
                .max_by_key(|r| r.check_in);
            match open {
                Some(record) => (
                    Direction::Out,
                    PunchPlan::CloseRecord {
                        record_id: record.id.clone(),
                    },
                ),
                None => {
                    tracing::warn!(
                        records = records_today.len(),
                        "departure without an open record; writing check-out-only record"
                    );
                    (Direction::Out, PunchPlan::OrphanCheckOut)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CaptureMethod;
    use chrono::{DateTime, Duration, Utc};

    fn at(hour: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-19T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::hours(hour)
    }

    fn record(id: &str, check_in: Option<i64>, check_out: Option<i64>) -> AttendanceRecord {
        AttendanceRecord {
            id: id.into(),
            worker_id: "w".into(),
            day: at(0).date_naive(),
            check_in: check_in.map(at),
            check_out: check_out.map(at),
            method: CaptureMethod::Face,
            needs_reconciliation: false,
        }
    }

    #[test]
    fn test_no_punches_is_arrival() {
        assert_eq!(resolve_direction(&[]), Direction::In);
        assert_eq!(plan_punch(&[]), (Direction::In, PunchPlan::OpenRecord));
    }

    #[test]
    fn test_open_record_is_departure_closing_it() {
        let records = [record("r1", Some(9), None)];
        assert_eq!(
            plan_punch(&records),
            (
                Direction::Out,
                PunchPlan::CloseRecord {
                    record_id: "r1".into()
                }
            )
        );
    }

    #[test]
    fn test_closed_record_is_arrival() {
        let records = [record("r1", Some(9), Some(12))];
        assert_eq!(plan_punch(&records), (Direction::In, PunchPlan::OpenRecord));
    }

    #[test]
    fn test_closes_most_recent_open_record() {
        // Anomalous history: two open records, a closed one and a
        // check-out-only one (5 punches).
        let records = [
            record("r1", Some(8), None),
            record("r2", Some(10), Some(11)),
            record("r4", None, Some(12)),
            record("r3", Some(13), None),
        ];
        assert_eq!(
            plan_punch(&records),
            (
                Direction::Out,
                PunchPlan::CloseRecord {
                    record_id: "r3".into()
                }
            )
        );
    }

    #[test]
    fn test_orphan_check_out_when_nothing_open() {
        // One check-out-only record: odd count, nothing open.
        let records = [record("r1", None, Some(9))];
        assert_eq!(
            plan_punch(&records),
            (Direction::Out, PunchPlan::OrphanCheckOut)
        );
    }

    #[test]
    fn test_multiple_pairs_per_day() {
        let records = [
            record("r1", Some(8), Some(12)),
            record("r2", Some(13), Some(17)),
            record("r3", Some(18), None),
        ];
        assert_eq!(resolve_direction(&records), Direction::Out);
    }
}
