use chrono::Duration as ChronoDuration;
use rollcall_core::matcher::{DEFAULT_BASE_TOLERANCE, DEFAULT_RELAXED_TOLERANCE};
use rollcall_core::{ByteOrder, PipelineSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "/etc/rollcall/rollcall.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "system" => Ok(Self::System),
            other => Err(format!("unknown bus: {other}")),
        }
    }
}

/// Daemon configuration: defaults, then the TOML file, then `ROLLCALL_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance for an uncovered face.
    pub base_tolerance: f64,
    /// Maximum Euclidean distance for a masked face.
    pub relaxed_tolerance: f64,
    /// Minimum minutes between two records for one identity/schedule pair.
    pub cooldown_minutes: i64,
    /// Bound on SQLite lock waits.
    pub write_timeout_ms: u64,
    /// Bound on a full detection decision as seen by D-Bus callers.
    pub decision_timeout_ms: u64,
    /// Byte order of stored embedding blobs.
    pub embedding_byte_order: ByteOrder,
    pub bus: BusKind,
    /// Pending detections the engine will queue before callers wait.
    pub queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: rollcall_store::default_db_path(),
            base_tolerance: DEFAULT_BASE_TOLERANCE,
            relaxed_tolerance: DEFAULT_RELAXED_TOLERANCE,
            cooldown_minutes: rollcall_core::ledger::DEFAULT_COOLDOWN_MINUTES,
            write_timeout_ms: 2000,
            decision_timeout_ms: 3000,
            embedding_byte_order: ByteOrder::Le,
            bus: BusKind::Session,
            queue_depth: 64,
        }
    }
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` (or the default path) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Apply `ROLLCALL_*` overrides read through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        override_parsed(&var, "ROLLCALL_BASE_TOLERANCE", &mut self.base_tolerance);
        override_parsed(&var, "ROLLCALL_RELAXED_TOLERANCE", &mut self.relaxed_tolerance);
        override_parsed(&var, "ROLLCALL_COOLDOWN_MINUTES", &mut self.cooldown_minutes);
        override_parsed(&var, "ROLLCALL_WRITE_TIMEOUT_MS", &mut self.write_timeout_ms);
        override_parsed(&var, "ROLLCALL_DECISION_TIMEOUT_MS", &mut self.decision_timeout_ms);
        override_parsed(&var, "ROLLCALL_EMBEDDING_BYTE_ORDER", &mut self.embedding_byte_order);
        override_parsed(&var, "ROLLCALL_BUS", &mut self.bus);
        override_parsed(&var, "ROLLCALL_QUEUE_DEPTH", &mut self.queue_depth);
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            base_tolerance: self.base_tolerance,
            relaxed_tolerance: self.relaxed_tolerance,
            cooldown: self.cooldown(),
        }
    }

    /// Cooldown as a duration. Values chrono cannot represent fall back to the default.
    fn cooldown(&self) -> ChronoDuration {
        ChronoDuration::try_minutes(self.cooldown_minutes.max(0)).unwrap_or_else(|| {
            tracing::warn!(
                cooldown_minutes = self.cooldown_minutes,
                "cooldown out of range; using default"
            );
            ChronoDuration::minutes(rollcall_core::ledger::DEFAULT_COOLDOWN_MINUTES)
        })
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }
}

fn override_parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}
