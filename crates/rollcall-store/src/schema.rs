//! Database schema for the attendance store.

use rusqlite::{params, Connection, OptionalExtension};

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// `day_of_week` values, as written by the enrollment tooling.
pub const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY,
    name          TEXT NOT NULL,
    face_encoding BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS courses (
    course_id   INTEGER PRIMARY KEY,
    course_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schedules (
    schedule_id INTEGER PRIMARY KEY,
    user_id     INTEGER NOT NULL REFERENCES users(id),
    course_id   INTEGER NOT NULL REFERENCES courses(course_id),
    day_of_week TEXT NOT NULL,
    start_time  TEXT NOT NULL,
    end_time    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_schedules_user_day
    ON schedules(user_id, day_of_week);

CREATE TABLE IF NOT EXISTS attendance (
    id          INTEGER PRIMARY KEY,
    user_id     INTEGER NOT NULL REFERENCES users(id),
    schedule_id INTEGER NOT NULL REFERENCES schedules(schedule_id),
    scan_date   TEXT NOT NULL,
    scan_time   TEXT NOT NULL,
    status      TEXT NOT NULL CHECK (status IN ('On time', 'Present', 'Left early'))
);

CREATE INDEX IF NOT EXISTS idx_attendance_cooldown
    ON attendance(user_id, schedule_id, scan_date, scan_time);
";

/// Idempotently create every table and stamp the schema version.
pub fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the stamped schema version, if any.
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()))
}
