//! In-memory store used by unit tests across the crate.

use crate::store::{AttendanceStore, IdentityRow, IdentityStore, ScheduleStore, StoreError};
use crate::types::{
    AttendanceRecord, ByteOrder, CourseEntry, Embedding, IdentityId, ScheduleEntry, ScheduleId,
    EMBEDDING_DIM,
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Zero vector with a single non-zero component.
pub fn embedding_with(axis: usize, value: f64) -> Embedding {
    let mut values = vec![0.0; EMBEDDING_DIM];
    values[axis] = value;
    Embedding { values }
}

pub fn at(date: (i32, u32, u32), h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(date.0, date.1, date.2)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

pub fn schedule(
    schedule_id: ScheduleId,
    identity_id: IdentityId,
    weekday: Weekday,
    start: (u32, u32),
    end: (u32, u32),
    course: &str,
) -> ScheduleEntry {
    ScheduleEntry {
        schedule_id,
        identity_id,
        weekday,
        start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
        end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        course: CourseEntry {
            course_id: schedule_id * 10,
            name: course.into(),
        },
    }
}

#[derive(Default)]
pub struct MemoryStore {
    identities: Mutex<Vec<IdentityRow>>,
    schedules: Mutex<Vec<ScheduleEntry>>,
    records: Mutex<Vec<AttendanceRecord>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    read_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn enroll(&self, id: IdentityId, name: &str, embedding: &Embedding) {
        self.enroll_raw(id, name, embedding.to_bytes(ByteOrder::Le));
    }

    pub fn enroll_raw(&self, id: IdentityId, name: &str, embedding: Vec<u8>) {
        self.identities.lock().unwrap().push(IdentityRow {
            id,
            name: name.into(),
            embedding,
        });
    }

    pub fn add_schedule(&self, entry: ScheduleEntry) {
        self.schedules.lock().unwrap().push(entry);
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Sleep inside every cooldown lookup, widening any check-then-write race.
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

impl IdentityStore for MemoryStore {
    fn load_identities(&self) -> Result<Vec<IdentityRow>, StoreError> {
        self.check_reads()?;
        Ok(self.identities.lock().unwrap().clone())
    }

    fn identity_name(&self, id: IdentityId) -> Result<Option<String>, StoreError> {
        self.check_reads()?;
        Ok(self
            .identities
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.name.clone()))
    }
}

impl ScheduleStore for MemoryStore {
    fn schedules_on(
        &self,
        identity_id: IdentityId,
        weekday: Weekday,
    ) -> Result<Vec<ScheduleEntry>, StoreError> {
        self.check_reads()?;
        let mut out: Vec<ScheduleEntry> = self
            .schedules
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.identity_id == identity_id && s.weekday == weekday)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.schedule_id);
        Ok(out)
    }

    fn schedule_by_id(&self, schedule_id: ScheduleId) -> Result<Option<ScheduleEntry>, StoreError> {
        self.check_reads()?;
        Ok(self
            .schedules
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.schedule_id == schedule_id)
            .cloned())
    }
}

impl AttendanceStore for MemoryStore {
    fn last_record_on(
        &self,
        identity_id: IdentityId,
        schedule_id: ScheduleId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        self.check_reads()?;
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.identity_id == identity_id
                    && r.schedule_id == schedule_id
                    && r.scan_time.date() == date
            })
            .max_by_key(|r| r.scan_time)
            .cloned())
    }

    fn append_record(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteFailed("memory store read-only".into()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
