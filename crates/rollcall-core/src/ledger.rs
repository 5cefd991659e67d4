//! Attendance ledger, the only writer of attendance records.
//!
//! Each evaluation runs the cooldown check, the punctuality classification
//! and the append as one unit under a lock keyed by `(identity, schedule)`.
//! Evaluations for different keys never contend on that lock.

use crate::store::AttendanceStore;
use crate::types::{AttendanceRecord, AttendanceStatus, IdentityId, ScheduleEntry, ScheduleId};
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_COOLDOWN_MINUTES: i64 = 30;

/// Key-lock table size above which idle entries are pruned.
const KEY_LOCK_PRUNE_THRESHOLD: usize = 1024;

/// Result of one ledger evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Outcome {
    /// A new record was committed.
    Recorded {
        status: AttendanceStatus,
        scan_time: NaiveDateTime,
    },
    /// A record for this key already exists inside the cooldown window.
    TooSoon {
        status: AttendanceStatus,
        last_scan: NaiveDateTime,
    },
    /// Lookup or write failed; nothing was committed.
    RecordingFailed {
        status: AttendanceStatus,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeReason {
    Recorded,
    TooSoon,
    RecordingFailed,
}

impl fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Recorded => "recorded",
            Self::TooSoon => "too_soon",
            Self::RecordingFailed => "recording_failed",
        })
    }
}

impl Outcome {
    pub fn status(&self) -> AttendanceStatus {
        match self {
            Self::Recorded { status, .. }
            | Self::TooSoon { status, .. }
            | Self::RecordingFailed { status, .. } => *status,
        }
    }

    pub fn recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }

    pub fn reason(&self) -> OutcomeReason {
        match self {
            Self::Recorded { .. } => OutcomeReason::Recorded,
            Self::TooSoon { .. } => OutcomeReason::TooSoon,
            Self::RecordingFailed { .. } => OutcomeReason::RecordingFailed,
        }
    }
}

type LedgerKey = (IdentityId, ScheduleId);

pub struct AttendanceLedger<S: ?Sized> {
    store: Arc<S>,
    cooldown: Duration,
    key_locks: Mutex<HashMap<LedgerKey, Arc<Mutex<()>>>>,
}

impl<S: AttendanceStore + ?Sized> AttendanceLedger<S> {
    pub fn new(store: Arc<S>, cooldown: Duration) -> Self {
        Self {
            store,
            cooldown,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_cooldown(store: Arc<S>) -> Self {
        Self::new(store, Duration::minutes(DEFAULT_COOLDOWN_MINUTES))
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Decide whether `identity_id` gets a new record for `schedule` at `now`.
    ///
    /// At most one `Recorded` outcome is produced per key per cooldown window,
    /// including when callers race on the same key from several threads.
    pub fn evaluate(
        &self,
        identity_id: IdentityId,
        schedule: &ScheduleEntry,
        now: NaiveDateTime,
    ) -> Outcome {
        let schedule_id = schedule.schedule_id;
        let key_lock = self.key_lock((identity_id, schedule_id));
        let _guard = lock_ignoring_poison(&key_lock);

        let status = AttendanceStatus::classify(now.time(), schedule.start, schedule.end);

        let last = match self.store.last_record_on(identity_id, schedule_id, now.date()) {
            Ok(last) => last,
            Err(e) => {
                tracing::error!(identity_id, schedule_id, error = %e, "cooldown lookup failed");
                return Outcome::RecordingFailed {
                    status,
                    error: e.to_string(),
                };
            }
        };

        if let Some(last) = last {
            if now - last.scan_time < self.cooldown {
                tracing::debug!(
                    identity_id,
                    schedule_id,
                    last_scan = %last.scan_time,
                    "attendance already logged inside cooldown"
                );
                return Outcome::TooSoon {
                    status: last.status,
                    last_scan: last.scan_time,
                };
            }
        }

        let record = AttendanceRecord {
            identity_id,
            schedule_id,
            scan_time: now,
            status,
        };

        match self.store.append_record(&record) {
            Ok(()) => {
                tracing::info!(
                    identity_id,
                    schedule_id,
                    course = %schedule.course.name,
                    status = %status,
                    scan_time = %now,
                    "attendance recorded"
                );
                Outcome::Recorded {
                    status,
                    scan_time: now,
                }
            }
            Err(e) => {
                tracing::error!(identity_id, schedule_id, error = %e, "attendance write failed");
                Outcome::RecordingFailed {
                    status,
                    error: e.to_string(),
                }
            }
        }
    }

    fn key_lock(&self, key: LedgerKey) -> Arc<Mutex<()>> {
        let mut locks = lock_ignoring_poison(&self.key_locks);
        if locks.len() > KEY_LOCK_PRUNE_THRESHOLD {
            // Only the table holds an idle key's lock.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(locks.entry(key).or_default())
    }
}

/// A panic inside one evaluation must not wedge every later one on the same key.
fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, schedule, MemoryStore};
    use chrono::Weekday;

    const MONDAY: (i32, u32, u32) = (2024, 1, 1);
    const TUESDAY: (i32, u32, u32) = (2024, 1, 2);

    fn algebra() -> ScheduleEntry {
        schedule(7, 1, Weekday::Mon, (9, 0), (10, 0), "Algebra")
    }

    fn ledger() -> (Arc<MemoryStore>, AttendanceLedger<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let ledger = AttendanceLedger::with_default_cooldown(Arc::clone(&store));
        (store, ledger)
    }

    #[test]
    fn test_alice_scenario() {
        let (store, ledger) = ledger();
        let sched = algebra();

        let first = ledger.evaluate(1, &sched, at(MONDAY, 9, 5));
        assert_eq!(
            first,
            Outcome::Recorded { status: AttendanceStatus::Present, scan_time: at(MONDAY, 9, 5) }
        );

        let second = ledger.evaluate(1, &sched, at(MONDAY, 9, 10));
        assert_eq!(second.reason(), OutcomeReason::TooSoon);
        assert_eq!(second.status(), AttendanceStatus::Present);
        assert!(!second.recorded());

        // 25 minutes after the recorded scan.
        let third = ledger.evaluate(1, &sched, at(MONDAY, 9, 30));
        assert_eq!(third.reason(), OutcomeReason::TooSoon);

        // 35 minutes after the recorded scan.
        let fourth = ledger.evaluate(1, &sched, at(MONDAY, 9, 40));
        assert!(fourth.recorded());
        assert_eq!(fourth.status(), AttendanceStatus::Present);

        assert_eq!(store.records().len(), 2);
    }

    #[test]
    fn test_cooldown_boundary_exact() {
        let (_store, ledger) = ledger();
        let sched = algebra();
        assert!(ledger.evaluate(1, &sched, at(MONDAY, 9, 0)).recorded());
        assert!(!ledger.evaluate(1, &sched, at(MONDAY, 9, 29)).recorded());
        assert!(ledger.evaluate(1, &sched, at(MONDAY, 9, 30)).recorded());
    }

    #[test]
    fn test_status_classification_through_ledger() {
        let sched = algebra();
        for (h, m, expected) in [
            (8, 59, AttendanceStatus::OnTime),
            (9, 0, AttendanceStatus::OnTime),
            (9, 30, AttendanceStatus::Present),
            (10, 0, AttendanceStatus::Present),
            (10, 5, AttendanceStatus::LeftEarly),
        ] {
            let (_store, ledger) = ledger();
            let outcome = ledger.evaluate(1, &sched, at(MONDAY, h, m));
            assert!(outcome.recorded());
            assert_eq!(outcome.status(), expected, "at {h:02}:{m:02}");
        }
    }

    #[test]
    fn test_out_of_order_scans_record_once() {
        let (store, ledger) = ledger();
        let sched = algebra();

        assert!(ledger.evaluate(1, &sched, at(MONDAY, 9, 10)).recorded());
        // Earlier than the stored scan: the elapsed time is negative.
        let earlier = ledger.evaluate(1, &sched, at(MONDAY, 9, 5));
        assert_eq!(
            earlier,
            Outcome::TooSoon { status: AttendanceStatus::Present, last_scan: at(MONDAY, 9, 10) }
        );
        let much_earlier = ledger.evaluate(1, &sched, at(MONDAY, 8, 30));
        assert_eq!(much_earlier.reason(), OutcomeReason::TooSoon);

        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_too_soon_reports_stored_status() {
        let (_store, ledger) = ledger();
        let sched = algebra();
        assert_eq!(
            ledger.evaluate(1, &sched, at(MONDAY, 8, 55)).status(),
            AttendanceStatus::OnTime
        );
        // Now inside the window, but the stored status is what gets echoed.
        let again = ledger.evaluate(1, &sched, at(MONDAY, 9, 10));
        assert_eq!(again.reason(), OutcomeReason::TooSoon);
        assert_eq!(again.status(), AttendanceStatus::OnTime);
    }

    #[test]
    fn test_new_day_resets_cooldown() {
        let (store, ledger) = ledger();
        let monday = algebra();
        let mut tuesday = algebra();
        tuesday.weekday = Weekday::Tue;

        assert!(ledger.evaluate(1, &monday, at(MONDAY, 9, 50)).recorded());
        assert!(ledger.evaluate(1, &tuesday, at(TUESDAY, 9, 5)).recorded());
        assert_eq!(store.records().len(), 2);
    }

    #[test]
    fn test_distinct_keys_independent() {
        let (store, ledger) = ledger();
        let sched = algebra();
        let physics = schedule(8, 1, Weekday::Mon, (9, 0), (10, 0), "Physics");

        assert!(ledger.evaluate(1, &sched, at(MONDAY, 9, 5)).recorded());
        assert!(ledger.evaluate(2, &sched, at(MONDAY, 9, 5)).recorded());
        assert!(ledger.evaluate(1, &physics, at(MONDAY, 9, 5)).recorded());
        assert_eq!(store.records().len(), 3);
    }

    #[test]
    fn test_failed_write_leaves_nothing_and_retries() {
        let (store, ledger) = ledger();
        let sched = algebra();

        store.fail_writes(true);
        let failed = ledger.evaluate(1, &sched, at(MONDAY, 9, 5));
        assert_eq!(failed.reason(), OutcomeReason::RecordingFailed);
        assert!(store.records().is_empty());

        store.fail_writes(false);
        let retried = ledger.evaluate(1, &sched, at(MONDAY, 9, 6));
        assert!(retried.recorded());
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_failed_lookup_is_recording_failed() {
        let (store, ledger) = ledger();
        store.fail_reads(true);
        let outcome = ledger.evaluate(1, &algebra(), at(MONDAY, 9, 5));
        assert_eq!(outcome.reason(), OutcomeReason::RecordingFailed);
        assert!(store.records().is_empty());
    }

    #[test]
    fn test_concurrent_evaluations_record_once() {
        let (store, ledger) = ledger();
        // Widen the window between the cooldown read and the append.
        store.set_read_delay(std::time::Duration::from_millis(5));
        let sched = algebra();
        let now = at(MONDAY, 9, 5);

        let outcomes: Vec<Outcome> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| ledger.evaluate(1, &sched, now)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let recorded = outcomes.iter().filter(|o| o.recorded()).count();
        let too_soon = outcomes
            .iter()
            .filter(|o| o.reason() == OutcomeReason::TooSoon)
            .count();
        assert_eq!(recorded, 1);
        assert_eq!(too_soon, 15);
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = Outcome::TooSoon {
            status: AttendanceStatus::Present,
            last_scan: at(MONDAY, 9, 5),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["reason"], "too_soon");
        assert_eq!(json["status"], "Present");
    }
}
