//! rollcall-core: attendance decision pipeline.
//!
//! Turns recognized-face events into idempotent, time-aware attendance
//! records: nearest-neighbor identity matching, active-schedule lookup,
//! punctuality classification and a cooldown-guarded ledger.

pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod pipeline;
pub mod schedule;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use gallery::Gallery;
pub use ledger::{AttendanceLedger, Outcome, OutcomeReason};
pub use matcher::{EuclideanMatcher, IdentityMatcher, MatchError, MatchResult, MatchedIdentity, Matcher};
pub use pipeline::{
    AttendancePipeline, DisplayableOutcome, NoOcclusion, OcclusionClassifier, PipelineSettings,
};
pub use schedule::{ResolvedSchedule, ScheduleResolver};
pub use store::{AttendanceStore, IdentityRow, IdentityStore, ScheduleStore, StoreError};
pub use types::{
    AttendanceRecord, AttendanceStatus, BoundingBox, ByteOrder, CourseEntry, CourseId, DetectedFace,
    Embedding, EmbeddingError, FaceCrop, Identity, IdentityId, ScheduleEntry, ScheduleId,
    EMBEDDING_BYTES, EMBEDDING_DIM,
};
