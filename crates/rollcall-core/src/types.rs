use chrono::{NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of components in a face embedding (dlib ResNet encodings).
pub const EMBEDDING_DIM: usize = 128;

/// Size in bytes of a serialized embedding: `EMBEDDING_DIM` binary64 values.
pub const EMBEDDING_BYTES: usize = EMBEDDING_DIM * 8;

pub type IdentityId = i64;
pub type ScheduleId = i64;
pub type CourseId = i64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("embedding must have {expected} components, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
    #[error("embedding component {index} is not finite")]
    NonFinite { index: usize },
}

/// Byte order of stored embedding blobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Little-endian binary64, as written by the enrollment tooling.
    #[default]
    #[serde(alias = "little")]
    Le,
    #[serde(alias = "big")]
    Be,
}

impl FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "le" | "little" => Ok(Self::Le),
            "be" | "big" => Ok(Self::Be),
            other => Err(format!("unknown byte order: {other} (expected le or be)")),
        }
    }
}

/// Face embedding vector (`EMBEDDING_DIM` components for valid gallery entries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f64>,
}

impl Embedding {
    /// Build an embedding, rejecting the wrong dimension or non-finite values.
    pub fn new(values: Vec<f64>) -> Result<Self, EmbeddingError> {
        let embedding = Self { values };
        embedding.validate()?;
        Ok(embedding)
    }

    /// Check dimension and finiteness without taking ownership.
    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::InvalidDimension {
                expected: EMBEDDING_DIM,
                actual: self.values.len(),
            });
        }
        if let Some(index) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite { index });
        }
        Ok(())
    }

    /// Decode exactly `EMBEDDING_BYTES` bytes of binary64 values.
    pub fn from_bytes(bytes: &[u8], order: ByteOrder) -> Result<Self, EmbeddingError> {
        if bytes.len() != EMBEDDING_BYTES {
            return Err(EmbeddingError::InvalidLength {
                expected: EMBEDDING_BYTES,
                actual: bytes.len(),
            });
        }

        let values = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                match order {
                    ByteOrder::Le => f64::from_le_bytes(raw),
                    ByteOrder::Be => f64::from_be_bytes(raw),
                }
            })
            .collect();

        Self::new(values)
    }

    /// Serialize back to the blob layout accepted by [`from_bytes`](Self::from_bytes).
    pub fn to_bytes(&self, order: ByteOrder) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * 8);
        for v in &self.values {
            match order {
                ByteOrder::Le => out.extend_from_slice(&v.to_le_bytes()),
                ByteOrder::Be => out.extend_from_slice(&v.to_be_bytes()),
            }
        }
        out
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// A known person in the gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    pub embedding: Embedding,
}

/// Bounding box of a detected face in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

/// Grayscale crop of a face region, handed to the occlusion classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceCrop {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// One face reported by the frame source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    pub embedding: Vec<f64>,
    /// Region for the occlusion classifier, when the frame source supplies one.
    #[serde(default)]
    pub crop: Option<FaceCrop>,
    /// Mask verdict already computed upstream. Takes precedence over `crop`.
    #[serde(default)]
    pub masked: Option<bool>,
}

impl DetectedFace {
    pub fn new(embedding: Vec<f64>) -> Self {
        Self {
            bbox: None,
            embedding,
            crop: None,
            masked: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseEntry {
    pub course_id: CourseId,
    pub name: String,
}

/// One recurring class slot for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub schedule_id: ScheduleId,
    pub identity_id: IdentityId,
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub course: CourseEntry,
}

impl ScheduleEntry {
    /// Whether `time` falls inside `[start, end]`, both ends inclusive.
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

/// Punctuality of a scan relative to its schedule window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    #[serde(rename = "On time")]
    OnTime,
    #[serde(rename = "Present")]
    Present,
    #[serde(rename = "Left early")]
    LeftEarly,
}

impl AttendanceStatus {
    /// Classify a scan time against a `[start, end]` window.
    ///
    /// Arriving exactly at `start` is on time; exactly at `end` is still present.
    pub fn classify(time: NaiveTime, start: NaiveTime, end: NaiveTime) -> Self {
        if time <= start {
            Self::OnTime
        } else if time <= end {
            Self::Present
        } else {
            Self::LeftEarly
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnTime => "On time",
            Self::Present => "Present",
            Self::LeftEarly => "Left early",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "On time" => Ok(Self::OnTime),
            "Present" => Ok(Self::Present),
            "Left early" => Ok(Self::LeftEarly),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

/// One row of the append-only attendance fact table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity_id: IdentityId,
    pub schedule_id: ScheduleId,
    pub scan_time: NaiveDateTime,
    pub status: AttendanceStatus,
}
