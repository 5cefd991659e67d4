//! Storage seams consumed by the pipeline.
//!
//! The relational backend lives in `rollcall-store`; these traits are the
//! whole surface the decision logic is allowed to see.

use crate::types::{AttendanceRecord, IdentityId, ScheduleEntry, ScheduleId};
use chrono::{NaiveDate, Weekday};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("write failed and was rolled back: {0}")]
    WriteFailed(String),
    #[error("storage call timed out after {0} ms")]
    Timeout(u64),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Raw identity row as stored, before the embedding blob is validated.
#[derive(Debug, Clone)]
pub struct IdentityRow {
    pub id: IdentityId,
    pub name: String,
    pub embedding: Vec<u8>,
}

pub trait IdentityStore {
    /// Bulk load of every enrolled identity.
    fn load_identities(&self) -> Result<Vec<IdentityRow>, StoreError>;

    fn identity_name(&self, id: IdentityId) -> Result<Option<String>, StoreError>;
}

pub trait ScheduleStore {
    /// Every schedule entry of `identity_id` on `weekday`, ordered by `schedule_id`.
    fn schedules_on(
        &self,
        identity_id: IdentityId,
        weekday: Weekday,
    ) -> Result<Vec<ScheduleEntry>, StoreError>;

    fn schedule_by_id(&self, schedule_id: ScheduleId) -> Result<Option<ScheduleEntry>, StoreError>;
}

pub trait AttendanceStore {
    /// Most recent record for the pair whose scan falls on `date`.
    fn last_record_on(
        &self,
        identity_id: IdentityId,
        schedule_id: ScheduleId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Append one record atomically. A failed write leaves no partial row.
    fn append_record(&self, record: &AttendanceRecord) -> Result<(), StoreError>;
}
