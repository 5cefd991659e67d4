//! SQLite-backed identity, timetable and attendance store.

use crate::schema::{apply_schema, read_schema_version, WEEKDAY_NAMES};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use rollcall_core::{
    AttendanceRecord, AttendanceStatus, AttendanceStore, ByteOrder, CourseEntry, CourseId, Embedding,
    IdentityId, IdentityRow, IdentityStore, ScheduleEntry, ScheduleId, ScheduleStore, StoreError,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

/// Default bound on how long any statement may wait for a database lock.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(2000);

const TIME_FORMAT: &str = "%H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
/// Fixed-width so lexical order equals chronological order.
const SCAN_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const SCAN_TIME_PARSE: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Error, Debug)]
pub enum SqliteStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("lock poisoned: {0}")]
    Lock(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl SqliteStoreError {
    fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
        )
    }
}

/// Timetable entry to insert.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub identity_id: IdentityId,
    pub course_id: CourseId,
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// One attendance row joined with display names, for reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceReportRow {
    pub identity_id: IdentityId,
    pub name: String,
    pub schedule_id: ScheduleId,
    pub course: String,
    pub scan_time: NaiveDateTime,
    pub status: AttendanceStatus,
}

/// SQLite store. Thread-safe via an internal `Mutex<Connection>`.
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
    write_timeout: Duration,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path, write_timeout: Duration) -> Result<Self, SqliteStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SqliteStoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "journal mode set");
        let store = Self::init(conn, Some(path.to_path_buf()), write_timeout)?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        Self::init(Connection::open_in_memory()?, None, DEFAULT_WRITE_TIMEOUT)
    }

    fn init(
        conn: Connection,
        path: Option<PathBuf>,
        write_timeout: Duration,
    ) -> Result<Self, SqliteStoreError> {
        conn.busy_timeout(write_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        apply_schema(&conn)?;
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            write_timeout,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<u32, SqliteStoreError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?.unwrap_or(0))
    }

    /// Enroll a new identity with its embedding.
    pub fn add_identity(
        &self,
        name: &str,
        embedding: &Embedding,
        order: ByteOrder,
    ) -> Result<IdentityId, SqliteStoreError> {
        embedding
            .validate()
            .map_err(|e| SqliteStoreError::Invalid(e.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (name, face_encoding) VALUES (?1, ?2)",
            params![name, embedding.to_bytes(order)],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(identity_id = id, name, "identity enrolled");
        Ok(id)
    }

    pub fn add_course(&self, name: &str) -> Result<CourseId, SqliteStoreError> {
        let conn = self.lock()?;
        conn.execute("INSERT INTO courses (course_name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_courses(&self) -> Result<Vec<CourseEntry>, SqliteStoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT course_id, course_name FROM courses ORDER BY course_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(CourseEntry {
                course_id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn add_schedule(&self, new: &NewSchedule) -> Result<ScheduleId, SqliteStoreError> {
        if new.start > new.end {
            return Err(SqliteStoreError::Invalid(format!(
                "schedule starts at {} but ends at {}",
                new.start, new.end
            )));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO schedules (user_id, course_id, day_of_week, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.identity_id,
                new.course_id,
                weekday_name(new.weekday),
                new.start.format(TIME_FORMAT).to_string(),
                new.end.format(TIME_FORMAT).to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_schedules(&self) -> Result<Vec<ScheduleEntry>, SqliteStoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{SCHEDULE_SELECT} ORDER BY s.schedule_id"))?;
        let rows = stmt.query_map([], row_to_schedule)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every attendance row on `date`, oldest first.
    pub fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceReportRow>, SqliteStoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT a.user_id, u.name, a.schedule_id, c.course_name, a.scan_time, a.status
             FROM attendance a
             JOIN users u ON u.id = a.user_id
             JOIN schedules s ON s.schedule_id = a.schedule_id
             JOIN courses c ON c.course_id = s.course_id
             WHERE a.scan_date = ?1
             ORDER BY a.scan_time, a.id",
        )?;
        let rows = stmt.query_map(params![date.format(DATE_FORMAT).to_string()], |row| {
            Ok(AttendanceReportRow {
                identity_id: row.get(0)?,
                name: row.get(1)?,
                schedule_id: row.get(2)?,
                course: row.get(3)?,
                scan_time: parse_scan_time(row, 4)?,
                status: parse_status(row, 5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.conn
            .lock()
            .map_err(|e| SqliteStoreError::Lock(e.to_string()))
    }

    fn read_error(&self, e: SqliteStoreError) -> StoreError {
        if e.is_busy() {
            StoreError::Timeout(self.write_timeout.as_millis() as u64)
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }

    fn write_error(&self, e: SqliteStoreError) -> StoreError {
        if e.is_busy() {
            StoreError::Timeout(self.write_timeout.as_millis() as u64)
        } else {
            StoreError::WriteFailed(e.to_string())
        }
    }

    fn try_load_identities(&self) -> Result<Vec<IdentityRow>, SqliteStoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name, face_encoding FROM users ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(IdentityRow {
                id: row.get(0)?,
                name: row.get(1)?,
                embedding: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn try_identity_name(&self, id: IdentityId) -> Result<Option<String>, SqliteStoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row("SELECT name FROM users WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?)
    }

    fn try_schedules_on(
        &self,
        identity_id: IdentityId,
        weekday: Weekday,
    ) -> Result<Vec<ScheduleEntry>, SqliteStoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{SCHEDULE_SELECT} WHERE s.user_id = ?1 AND s.day_of_week = ?2 ORDER BY s.schedule_id"
        ))?;
        let rows = stmt.query_map(params![identity_id, weekday_name(weekday)], row_to_schedule)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn try_schedule_by_id(&self, schedule_id: ScheduleId) -> Result<Option<ScheduleEntry>, SqliteStoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                &format!("{SCHEDULE_SELECT} WHERE s.schedule_id = ?1"),
                params![schedule_id],
                row_to_schedule,
            )
            .optional()?)
    }

    fn try_last_record_on(
        &self,
        identity_id: IdentityId,
        schedule_id: ScheduleId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, SqliteStoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT user_id, schedule_id, scan_time, status FROM attendance
                 WHERE user_id = ?1 AND schedule_id = ?2 AND scan_date = ?3
                 ORDER BY scan_time DESC, id DESC
                 LIMIT 1",
                params![identity_id, schedule_id, date.format(DATE_FORMAT).to_string()],
                |row| {
                    Ok(AttendanceRecord {
                        identity_id: row.get(0)?,
                        schedule_id: row.get(1)?,
                        scan_time: parse_scan_time(row, 2)?,
                        status: parse_status(row, 3)?,
                    })
                },
            )
            .optional()?)
    }

    fn try_append_record(&self, record: &AttendanceRecord) -> Result<(), SqliteStoreError> {
        let mut conn = self.lock()?;
        // Dropping the transaction without commit rolls it back.
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO attendance (user_id, schedule_id, scan_date, scan_time, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.identity_id,
                record.schedule_id,
                record.scan_time.date().format(DATE_FORMAT).to_string(),
                record.scan_time.format(SCAN_TIME_FORMAT).to_string(),
                record.status.as_str(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl IdentityStore for SqliteStore {
    fn load_identities(&self) -> Result<Vec<IdentityRow>, StoreError> {
        self.try_load_identities().map_err(|e| self.read_error(e))
    }

    fn identity_name(&self, id: IdentityId) -> Result<Option<String>, StoreError> {
        self.try_identity_name(id).map_err(|e| self.read_error(e))
    }
}

impl ScheduleStore for SqliteStore {
    fn schedules_on(
        &self,
        identity_id: IdentityId,
        weekday: Weekday,
    ) -> Result<Vec<ScheduleEntry>, StoreError> {
        self.try_schedules_on(identity_id, weekday)
            .map_err(|e| self.read_error(e))
    }

    fn schedule_by_id(&self, schedule_id: ScheduleId) -> Result<Option<ScheduleEntry>, StoreError> {
        self.try_schedule_by_id(schedule_id)
            .map_err(|e| self.read_error(e))
    }
}

impl AttendanceStore for SqliteStore {
    fn last_record_on(
        &self,
        identity_id: IdentityId,
        schedule_id: ScheduleId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        self.try_last_record_on(identity_id, schedule_id, date)
            .map_err(|e| self.read_error(e))
    }

    fn append_record(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.try_append_record(record)
            .map_err(|e| self.write_error(e))
    }
}

const SCHEDULE_SELECT: &str = "SELECT s.schedule_id, s.user_id, s.day_of_week, s.start_time, \
     s.end_time, c.course_id, c.course_name \
     FROM schedules s JOIN courses c ON s.course_id = c.course_id";

/// Name stored in `schedules.day_of_week` for `weekday`.
pub fn weekday_name(weekday: Weekday) -> &'static str {
    WEEKDAY_NAMES[weekday.num_days_from_monday() as usize]
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(idx)?;
    NaiveTime::parse_from_str(&raw, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M"))
        .map_err(|e| conversion_error(idx, format!("bad time {raw:?}: {e}")))
}

fn parse_scan_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, SCAN_TIME_PARSE)
        .map_err(|e| conversion_error(idx, format!("bad scan time {raw:?}: {e}")))
}

fn parse_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<AttendanceStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| conversion_error(idx, e))
}

fn row_to_schedule(row: &Row<'_>) -> rusqlite::Result<ScheduleEntry> {
    let day: String = row.get(2)?;
    let weekday = day
        .parse::<Weekday>()
        .map_err(|_| conversion_error(2, format!("bad day_of_week {day:?}")))?;

    Ok(ScheduleEntry {
        schedule_id: row.get(0)?,
        identity_id: row.get(1)?,
        weekday,
        start: parse_time(row, 3)?,
        end: parse_time(row, 4)?,
        course: CourseEntry {
            course_id: row.get(5)?,
            name: row.get(6)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CURRENT_SCHEMA_VERSION;
    use rollcall_core::{
        AttendanceLedger, AttendancePipeline, DetectedFace, DisplayableOutcome, Gallery,
        OutcomeReason, PipelineSettings, ScheduleResolver, EMBEDDING_DIM,
    };
    use std::sync::Arc;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // 2024-01-01 was a Monday.
    fn monday(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn unit(axis: usize) -> Embedding {
        let mut values = vec![0.0; EMBEDDING_DIM];
        values[axis] = 1.0;
        Embedding::new(values).unwrap()
    }

    /// Alice (schedule 7 equivalent: Monday 09:00–10:00, Algebra) and Bob (no classes).
    fn seeded() -> (Arc<SqliteStore>, IdentityId, ScheduleId) {
        let store = SqliteStore::open_in_memory().unwrap();
        let alice = store.add_identity("Alice", &unit(0), ByteOrder::Le).unwrap();
        store.add_identity("Bob", &unit(1), ByteOrder::Le).unwrap();
        let algebra = store.add_course("Algebra").unwrap();
        let schedule = store
            .add_schedule(&NewSchedule {
                identity_id: alice,
                course_id: algebra,
                weekday: Weekday::Mon,
                start: t(9, 0),
                end: t(10, 0),
            })
            .unwrap();
        (Arc::new(store), alice, schedule)
    }

    #[test]
    fn test_schema_version() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_weekday_names() {
        assert_eq!(weekday_name(Weekday::Mon), "Monday");
        assert_eq!(weekday_name(Weekday::Sun), "Sunday");
        for name in WEEKDAY_NAMES {
            assert_eq!(weekday_name(name.parse().unwrap()), name);
        }
    }

    #[test]
    fn test_identity_round_trip_bytes() {
        let (store, alice, _) = seeded();
        let rows = store.load_identities().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].embedding, unit(0).to_bytes(ByteOrder::Le));
        assert_eq!(store.identity_name(alice).unwrap().as_deref(), Some("Alice"));
        assert_eq!(store.identity_name(999).unwrap(), None);
    }

    #[test]
    fn test_add_identity_rejects_wrong_dimension() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .add_identity("short", &Embedding { values: vec![0.0; 3] }, ByteOrder::Le)
            .unwrap_err();
        assert!(matches!(err, SqliteStoreError::Invalid(_)));
    }

    #[test]
    fn test_malformed_blob_skipped_by_gallery() {
        let (store, _, _) = seeded();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO users (name, face_encoding) VALUES ('Mallory', ?1)",
                params![vec![0u8; 1016]],
            )
            .unwrap();
        }
        let gallery = Gallery::load(store.as_ref(), ByteOrder::Le).unwrap();
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.skipped(), 1);
    }

    #[test]
    fn test_schedule_round_trip() {
        let (store, alice, schedule_id) = seeded();
        let entries = store.schedules_on(alice, Weekday::Mon).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.schedule_id, schedule_id);
        assert_eq!(entry.start, t(9, 0));
        assert_eq!(entry.end, t(10, 0));
        assert_eq!(entry.course.name, "Algebra");
        assert!(store.schedules_on(alice, Weekday::Tue).unwrap().is_empty());
        assert_eq!(store.schedule_by_id(schedule_id).unwrap().as_ref(), Some(entry));
        assert_eq!(store.list_schedules().unwrap().len(), 1);
    }

    #[test]
    fn test_schedule_accepts_short_time_format() {
        let (store, alice, _) = seeded();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO schedules (user_id, course_id, day_of_week, start_time, end_time)
                 VALUES (?1, 1, 'Friday', '13:00', '14:30')",
                params![alice],
            )
            .unwrap();
        }
        let entries = store.schedules_on(alice, Weekday::Fri).unwrap();
        assert_eq!(entries[0].end, t(14, 30));
    }

    #[test]
    fn test_add_schedule_rejects_inverted_window() {
        let (store, alice, _) = seeded();
        let err = store
            .add_schedule(&NewSchedule {
                identity_id: alice,
                course_id: 1,
                weekday: Weekday::Mon,
                start: t(11, 0),
                end: t(10, 0),
            })
            .unwrap_err();
        assert!(matches!(err, SqliteStoreError::Invalid(_)));
    }

    #[test]
    fn test_add_schedule_unknown_identity_fails() {
        let (store, _, _) = seeded();
        let result = store.add_schedule(&NewSchedule {
            identity_id: 404,
            course_id: 1,
            weekday: Weekday::Mon,
            start: t(9, 0),
            end: t(10, 0),
        });
        assert!(matches!(result, Err(SqliteStoreError::Sqlite(_))));
    }

    #[test]
    fn test_last_record_on_picks_latest_same_day() {
        let (store, alice, schedule_id) = seeded();
        for (h, m) in [(9, 5), (9, 40), (9, 20)] {
            store
                .append_record(&AttendanceRecord {
                    identity_id: alice,
                    schedule_id,
                    scan_time: monday(h, m),
                    status: AttendanceStatus::Present,
                })
                .unwrap();
        }

        let last = store
            .last_record_on(alice, schedule_id, monday(0, 0).date())
            .unwrap()
            .unwrap();
        assert_eq!(last.scan_time, monday(9, 40));

        let next_day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(store.last_record_on(alice, schedule_id, next_day).unwrap().is_none());
    }

    #[test]
    fn test_sub_second_scan_time_preserved() {
        let (store, alice, schedule_id) = seeded();
        let scan_time = monday(9, 5) + chrono::Duration::milliseconds(250);
        store
            .append_record(&AttendanceRecord {
                identity_id: alice,
                schedule_id,
                scan_time,
                status: AttendanceStatus::Present,
            })
            .unwrap();
        let last = store
            .last_record_on(alice, schedule_id, scan_time.date())
            .unwrap()
            .unwrap();
        assert_eq!(last.scan_time, scan_time);
    }

    #[test]
    fn test_failed_append_leaves_no_row() {
        let (store, alice, _) = seeded();
        // Unknown schedule violates the foreign key; the insert must roll back.
        let err = store
            .append_record(&AttendanceRecord {
                identity_id: alice,
                schedule_id: 999,
                scan_time: monday(9, 5),
                status: AttendanceStatus::Present,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::WriteFailed(_)));
        assert!(store.records_on(monday(0, 0).date()).unwrap().is_empty());
    }

    #[test]
    fn test_ledger_scenario_against_sqlite() {
        let (store, alice, schedule_id) = seeded();
        let schedule = store.schedule_by_id(schedule_id).unwrap().unwrap();
        let ledger = AttendanceLedger::with_default_cooldown(Arc::clone(&store));

        assert!(ledger.evaluate(alice, &schedule, monday(9, 5)).recorded());
        assert_eq!(
            ledger.evaluate(alice, &schedule, monday(9, 10)).reason(),
            OutcomeReason::TooSoon
        );
        assert_eq!(
            ledger.evaluate(alice, &schedule, monday(9, 30)).reason(),
            OutcomeReason::TooSoon
        );
        assert!(ledger.evaluate(alice, &schedule, monday(9, 40)).recorded());

        let report = store.records_on(monday(0, 0).date()).unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].name, "Alice");
        assert_eq!(report[0].course, "Algebra");
        assert_eq!(report[1].scan_time, monday(9, 40));
    }

    #[test]
    fn test_concurrent_ledger_against_sqlite() {
        let (store, alice, schedule_id) = seeded();
        let schedule = store.schedule_by_id(schedule_id).unwrap().unwrap();
        let ledger = AttendanceLedger::with_default_cooldown(Arc::clone(&store));

        let recorded = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| ledger.evaluate(alice, &schedule, monday(9, 5))))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|o| o.recorded())
                .count()
        });

        assert_eq!(recorded, 1);
        assert_eq!(store.records_on(monday(0, 0).date()).unwrap().len(), 1);
    }

    #[test]
    fn test_resolver_against_sqlite() {
        let (store, alice, schedule_id) = seeded();
        let resolver = ScheduleResolver::new(Arc::clone(&store));
        let resolved = resolver.resolve_active(alice, monday(9, 0)).unwrap().unwrap();
        assert_eq!(resolved.entry.schedule_id, schedule_id);
        assert!(resolver.resolve_active(alice, monday(10, 1)).unwrap().is_none());
    }

    #[test]
    fn test_pipeline_end_to_end() {
        let (store, _, _) = seeded();
        let gallery = Gallery::load(store.as_ref(), ByteOrder::Le).unwrap();
        let pipeline =
            AttendancePipeline::new(Arc::clone(&store), Arc::new(gallery), PipelineSettings::default());

        let alice = DetectedFace::new(unit(0).values);
        let bob = DetectedFace::new(unit(1).values);
        let stranger = DetectedFace::new(unit(2).values);

        assert_eq!(
            pipeline.handle_detection(&alice, monday(8, 58)).message(),
            "No class scheduled"
        );
        assert_eq!(
            pipeline.handle_detection(&alice, monday(9, 0)).message(),
            "Attendance logged for Algebra, status=On time"
        );
        assert_eq!(
            pipeline.handle_detection(&alice, monday(9, 1)).message(),
            "Attendance recently logged for Algebra"
        );
        assert!(matches!(
            pipeline.handle_detection(&bob, monday(9, 1)),
            DisplayableOutcome::NoClassScheduled { .. }
        ));
        assert_eq!(pipeline.handle_detection(&stranger, monday(9, 1)).message(), "Unknown");

        assert_eq!(store.records_on(monday(0, 0).date()).unwrap().len(), 1);
    }

    #[test]
    fn test_open_file_database() {
        let dir = std::env::temp_dir().join(format!("rollcall-store-test-{}", std::process::id()));
        let path = dir.join("attendance.db");
        {
            let store = SqliteStore::open(&path, DEFAULT_WRITE_TIMEOUT).unwrap();
            store.add_course("Chemistry").unwrap();
        }
        let reopened = SqliteStore::open(&path, DEFAULT_WRITE_TIMEOUT).unwrap();
        assert_eq!(reopened.list_courses().unwrap()[0].name, "Chemistry");
        assert_eq!(reopened.path(), Some(path.as_path()));
        drop(reopened);
        let _ = std::fs::remove_dir_all(dir);
    }
}
