use crate::engine::{EngineError, EngineHandle};
use rollcall_core::{DetectedFace, DisplayableOutcome};
use serde_json::{json, Value};
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    engine: EngineHandle,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Decide attendance for one detected face.
    ///
    /// Takes a JSON `DetectedFace` and answers the JSON rendering of the
    /// outcome. A decision that overruns the timeout answers a `pending`
    /// outcome; its result, if any, shows up in `LatestOutcome`.
    async fn handle_detection(&self, face_json: &str) -> zbus::fdo::Result<String> {
        let face: DetectedFace = serde_json::from_str(face_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("malformed detection: {e}")))?;
        let now = chrono::Local::now().naive_local();

        match self.engine.detect(face, now).await {
            Ok(outcome) => Ok(render_outcome(&outcome).to_string()),
            Err(EngineError::Timeout(ms)) => {
                tracing::warn!(timeout_ms = ms, "detection decision timed out");
                Ok(pending_outcome().to_string())
            }
            Err(e) => Err(zbus::fdo::Error::Failed(e.to_string())),
        }
    }

    /// Most recent outcome, or an empty object before the first detection.
    async fn latest_outcome(&self) -> zbus::fdo::Result<String> {
        let latest = match self.engine.latest() {
            Some(latest) => {
                let mut rendered = render_outcome(&latest.outcome);
                rendered["at"] = json!(latest.at);
                rendered
            }
            None => json!({}),
        };
        Ok(latest.to_string())
    }

    /// Re-read enrolled identities. Returns the gallery size.
    async fn reload_gallery(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("gallery reload requested");
        let count = self
            .engine
            .reload_gallery()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(count as u32)
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self
            .engine
            .status()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "gallery_size": status.gallery_size,
            "gallery_skipped": status.gallery_skipped,
            "detections": status.detections,
            "logged": status.logged,
            "degraded": status.degraded,
            "abandoned": status.abandoned,
        })
        .to_string())
    }
}

/// JSON shape returned to D-Bus callers.
pub fn render_outcome(outcome: &DisplayableOutcome) -> Value {
    json!({
        "kind": kind_of(outcome),
        "label": outcome.label(),
        "message": outcome.message(),
        "banner": outcome.banner(),
        "degraded": outcome.is_degraded(),
        "outcome": outcome,
    })
}

fn kind_of(outcome: &DisplayableOutcome) -> &'static str {
    match outcome {
        DisplayableOutcome::Unknown { .. } => "unknown",
        DisplayableOutcome::NoClassScheduled { .. } => "no_class_scheduled",
        DisplayableOutcome::RecentlyLogged { .. } => "recently_logged",
        DisplayableOutcome::Logged { .. } => "logged",
        DisplayableOutcome::RecordingFailed { .. } => "recording_failed",
        DisplayableOutcome::Unavailable { .. } => "unavailable",
    }
}

/// Answer for a decision the engine did not finish in time. It may still be
/// committed, so this must not read as a failure.
fn pending_outcome() -> Value {
    json!({
        "kind": "pending",
        "label": "Unknown",
        "message": "Attendance decision pending",
        "banner": "Attendance decision pending",
        "degraded": false,
    })
}
