//! Per-detection orchestration: match → resolve schedule → ledger.

use crate::gallery::Gallery;
use crate::ledger::{AttendanceLedger, Outcome};
use crate::matcher::{IdentityMatcher, MatchedIdentity, DEFAULT_BASE_TOLERANCE, DEFAULT_RELAXED_TOLERANCE};
use crate::schedule::ScheduleResolver;
use crate::store::{AttendanceStore, IdentityStore, ScheduleStore, StoreError};
use crate::types::{AttendanceStatus, ByteOrder, DetectedFace, Embedding, FaceCrop};
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::sync::Arc;

/// Mask / face-covering classifier.
pub trait OcclusionClassifier: Send + Sync {
    fn is_occluded(&self, crop: &FaceCrop) -> bool;
}

/// Classifier used when no occlusion model is wired in.
pub struct NoOcclusion;

impl OcclusionClassifier for NoOcclusion {
    fn is_occluded(&self, _crop: &FaceCrop) -> bool {
        false
    }
}

/// What the presentation layer shows for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayableOutcome {
    Unknown {
        distance: Option<f64>,
    },
    NoClassScheduled {
        identity: MatchedIdentity,
    },
    RecentlyLogged {
        identity: MatchedIdentity,
        course: String,
        status: AttendanceStatus,
    },
    Logged {
        identity: MatchedIdentity,
        course: String,
        status: AttendanceStatus,
    },
    RecordingFailed {
        identity: MatchedIdentity,
        course: String,
    },
    /// The schedule lookup itself failed; nothing could be decided.
    Unavailable {
        identity: MatchedIdentity,
    },
}

impl DisplayableOutcome {
    /// Status line drawn under the face box.
    pub fn message(&self) -> String {
        match self {
            Self::Unknown { .. } => "Unknown".to_string(),
            Self::NoClassScheduled { .. } => "No class scheduled".to_string(),
            Self::RecentlyLogged { course, .. } => format!("Attendance recently logged for {course}"),
            Self::Logged { course, status, .. } => {
                format!("Attendance logged for {course}, status={status}")
            }
            Self::RecordingFailed { course, .. } => {
                format!("Attendance could not be recorded for {course}")
            }
            Self::Unavailable { .. } => "Attendance unavailable".to_string(),
        }
    }

    /// Name drawn above the face box.
    pub fn label(&self) -> &str {
        self.identity().map(|i| i.name.as_str()).unwrap_or("Unknown")
    }

    /// Kiosk greeting line.
    pub fn banner(&self) -> String {
        let Some(identity) = self.identity() else {
            return "Face not recognized".to_string();
        };
        let name = &identity.name;
        match self {
            Self::NoClassScheduled { .. } => format!("Welcome, {name}! No class scheduled."),
            Self::Logged { course, status, .. } => {
                format!("Welcome, {name}! Attendance logged for {course}. Status: {status}")
            }
            _ => format!("Welcome, {name}! {}", self.message()),
        }
    }

    pub fn identity(&self) -> Option<&MatchedIdentity> {
        match self {
            Self::Unknown { .. } => None,
            Self::NoClassScheduled { identity }
            | Self::RecentlyLogged { identity, .. }
            | Self::Logged { identity, .. }
            | Self::RecordingFailed { identity, .. }
            | Self::Unavailable { identity } => Some(identity),
        }
    }

    /// Whether this outcome reflects an infrastructure failure.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::RecordingFailed { .. } | Self::Unavailable { .. })
    }
}

/// Tunables for the decision pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub base_tolerance: f64,
    pub relaxed_tolerance: f64,
    pub cooldown: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            base_tolerance: DEFAULT_BASE_TOLERANCE,
            relaxed_tolerance: DEFAULT_RELAXED_TOLERANCE,
            cooldown: Duration::minutes(crate::ledger::DEFAULT_COOLDOWN_MINUTES),
        }
    }
}

pub struct AttendancePipeline<S: ?Sized> {
    store: Arc<S>,
    gallery: Arc<Gallery>,
    matcher: IdentityMatcher,
    resolver: ScheduleResolver<S>,
    ledger: AttendanceLedger<S>,
    classifier: Box<dyn OcclusionClassifier>,
}

impl<S: ScheduleStore + AttendanceStore + ?Sized> AttendancePipeline<S> {
    pub fn new(store: Arc<S>, gallery: Arc<Gallery>, settings: PipelineSettings) -> Self {
        Self {
            matcher: IdentityMatcher::new(settings.base_tolerance, settings.relaxed_tolerance),
            resolver: ScheduleResolver::new(Arc::clone(&store)),
            ledger: AttendanceLedger::new(Arc::clone(&store), settings.cooldown),
            store,
            gallery,
            classifier: Box::new(NoOcclusion),
        }
    }

    pub fn with_classifier(mut self, classifier: impl OcclusionClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn gallery(&self) -> &Arc<Gallery> {
        &self.gallery
    }

    /// Swap in a new gallery snapshot. In-flight readers keep the old one.
    pub fn replace_gallery(&mut self, gallery: Arc<Gallery>) {
        self.gallery = gallery;
    }

    /// Decide and, when due, record attendance for one detected face.
    ///
    /// Every path returns an outcome; storage failures come back as degraded
    /// variants rather than errors.
    pub fn handle_detection(&self, face: &DetectedFace, now: NaiveDateTime) -> DisplayableOutcome {
        let occluded = self.is_occluded(face);
        let query = Embedding {
            values: face.embedding.clone(),
        };

        let result = match self.matcher.identify(&self.gallery, &query, occluded) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting detection with invalid embedding");
                return DisplayableOutcome::Unknown { distance: None };
            }
        };

        let Some(identity) = result.identity else {
            tracing::debug!(distance = ?result.distance, occluded, "no gallery match");
            return DisplayableOutcome::Unknown {
                distance: result.distance,
            };
        };

        let resolved = match self.resolver.resolve_active(identity.id, now) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                tracing::debug!(identity_id = identity.id, at = %now, "no active schedule");
                return DisplayableOutcome::NoClassScheduled { identity };
            }
            Err(e) => {
                tracing::warn!(identity_id = identity.id, error = %e, "schedule lookup failed");
                return DisplayableOutcome::Unavailable { identity };
            }
        };

        let course = resolved.entry.course.name.clone();
        match self.ledger.evaluate(identity.id, &resolved.entry, now) {
            Outcome::Recorded { status, .. } => DisplayableOutcome::Logged {
                identity,
                course,
                status,
            },
            Outcome::TooSoon { status, .. } => DisplayableOutcome::RecentlyLogged {
                identity,
                course,
                status,
            },
            Outcome::RecordingFailed { .. } => {
                DisplayableOutcome::RecordingFailed { identity, course }
            }
        }
    }

    fn is_occluded(&self, face: &DetectedFace) -> bool {
        if let Some(masked) = face.masked {
            return masked;
        }
        face.crop
            .as_ref()
            .is_some_and(|crop| self.classifier.is_occluded(crop))
    }
}

impl<S: IdentityStore + ScheduleStore + AttendanceStore + ?Sized> AttendancePipeline<S> {
    /// Reload the gallery from the identity store and swap it in.
    ///
    /// On failure the current gallery stays in service.
    pub fn reload_gallery(&mut self, order: ByteOrder) -> Result<usize, StoreError> {
        let gallery = Gallery::load(self.store.as_ref(), order)?;
        let count = gallery.len();
        self.replace_gallery(Arc::new(gallery));
        Ok(count)
    }
}
