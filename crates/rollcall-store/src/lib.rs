//! rollcall-store: SQLite persistence for the attendance pipeline.
//!
//! Implements the `rollcall-core` store traits over a single database
//! holding enrolled identities, the class timetable and the append-only
//! attendance table, plus the admin queries the CLI needs.

pub mod schema;
pub mod sqlite;

use std::path::PathBuf;

pub use sqlite::{
    weekday_name, AttendanceReportRow, NewSchedule, SqliteStore, SqliteStoreError,
    DEFAULT_WRITE_TIMEOUT,
};

/// `$XDG_DATA_HOME/rollcall/attendance.db`, falling back to `~/.local/share`.
pub fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("attendance.db")
}
