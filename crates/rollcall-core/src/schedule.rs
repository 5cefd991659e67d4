//! Active-schedule lookup for an identity at a given instant.

use crate::store::{ScheduleStore, StoreError};
use crate::types::{IdentityId, ScheduleEntry, ScheduleId};
use chrono::{Datelike, NaiveDateTime};
use std::sync::Arc;

/// The schedule entry in force, plus any other entries that also cover the instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchedule {
    pub entry: ScheduleEntry,
    /// Overlapping entries that lost to `entry`. Non-empty means the timetable is inconsistent.
    pub overlapping: Vec<ScheduleId>,
}

pub struct ScheduleResolver<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ScheduleStore + ?Sized> ScheduleResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Find the entry whose weekday and `[start, end]` window contain `as_of`.
    ///
    /// When several entries cover the instant the lowest `schedule_id` wins
    /// and the rest are reported as a configuration warning.
    pub fn resolve_active(
        &self,
        identity_id: IdentityId,
        as_of: NaiveDateTime,
    ) -> Result<Option<ResolvedSchedule>, StoreError> {
        let time = as_of.time();
        let mut active: Vec<ScheduleEntry> = self
            .store
            .schedules_on(identity_id, as_of.weekday())?
            .into_iter()
            .filter(|entry| entry.contains(time))
            .collect();

        if active.is_empty() {
            return Ok(None);
        }

        active.sort_by_key(|entry| entry.schedule_id);
        let mut entries = active.into_iter();
        let Some(entry) = entries.next() else {
            return Ok(None);
        };
        let overlapping: Vec<ScheduleId> = entries.map(|e| e.schedule_id).collect();

        if !overlapping.is_empty() {
            tracing::warn!(
                identity_id,
                chosen = entry.schedule_id,
                ?overlapping,
                at = %as_of,
                "overlapping schedules; check the timetable"
            );
        }

        Ok(Some(ResolvedSchedule { entry, overlapping }))
    }
}
