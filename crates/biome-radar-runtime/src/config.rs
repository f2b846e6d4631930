//! TOML configuration file.
//!
//! Every field has a default, so a missing file or a partial file is valid.
//!
//! ```toml
//! log_level = "debug"
//!
//! [detector]
//! accounts = ["alice", "bob"]
//! poll_interval_ms = 1000
//!
//! [accounts]
//! alice = "1001"
//! bob = "1002"
//!
//! [join]
//! stop_redundant_joins = true
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use biome_radar_core::defaults::{
    BIOME_END_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS, DETECTION_TIMEOUT_MS, HEAD_WINDOW_BYTES,
    RECENT_LOG_WINDOW_SECS, STALE_THRESHOLD_MS, TAIL_WINDOW_BYTES, clamp_poll_interval_ms,
};
use biome_radar_detector::DetectorConfig;
use biome_radar_source_log::default_log_dir;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Tracing filter used when neither `BIOME_RADAR_LOG` nor `RUST_LOG` is set.
    pub log_level: Option<String>,
    pub detector: DetectorSection,
    /// Display name -> account id, consulted by the static lookup.
    pub accounts: BTreeMap<String, String>,
    pub join: JoinSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorSection {
    pub enabled: bool,
    /// Display names of the accounts to track.
    pub accounts: Vec<String>,
    pub poll_interval_ms: u64,
    pub log_dir: Option<PathBuf>,
    pub recent_window_secs: u64,
    pub tail_window_bytes: u64,
    pub head_window_bytes: u64,
    pub stale_after_ms: u64,
    pub whole_line_records: bool,
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            accounts: Vec::new(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            log_dir: None,
            recent_window_secs: RECENT_LOG_WINDOW_SECS,
            tail_window_bytes: TAIL_WINDOW_BYTES,
            head_window_bytes: HEAD_WINDOW_BYTES,
            stale_after_ms: STALE_THRESHOLD_MS as u64,
            whole_line_records: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JoinSection {
    pub enabled: bool,
    pub detection_timeout_ms: u64,
    pub biome_end_timeout_ms: u64,
    pub store_path: Option<PathBuf>,
    pub stop_redundant_joins: bool,
}

impl Default for JoinSection {
    fn default() -> Self {
        Self {
            enabled: true,
            detection_timeout_ms: DETECTION_TIMEOUT_MS,
            biome_end_timeout_ms: BIOME_END_TIMEOUT_MS,
            store_path: None,
            stop_redundant_joins: true,
        }
    }
}

/// `$XDG_CONFIG_HOME/biome-radar/config.toml`, else `$HOME/.config/...`.
pub fn default_config_path() -> Option<PathBuf> {
    xdg_dir("XDG_CONFIG_HOME", ".config").map(|d| d.join("biome-radar").join("config.toml"))
}

/// `$XDG_DATA_HOME/biome-radar/joins.json`, else `$HOME/.local/share/...`.
pub fn default_store_path() -> Option<PathBuf> {
    xdg_dir("XDG_DATA_HOME", ".local/share").map(|d| d.join("biome-radar").join("joins.json"))
}

fn xdg_dir(var: &str, home_fallback: &str) -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(var).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(home_fallback))
}

fn delta_from_secs(secs: u64) -> TimeDelta {
    TimeDelta::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX)).unwrap_or(TimeDelta::MAX)
}

fn delta_from_millis(ms: u64) -> TimeDelta {
    TimeDelta::try_milliseconds(i64::try_from(ms).unwrap_or(i64::MAX)).unwrap_or(TimeDelta::MAX)
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load the config file.
    ///
    /// An `explicit` path must exist. The default path may be absent, in which
    /// case defaults are returned. Returns the config and the path it came from.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok((Self::default(), None)),
            },
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Self::default(), None));
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate()?;
        Ok((config, Some(path)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detector;
        if d.tail_window_bytes == 0 {
            return Err(ConfigError::Invalid(
                "detector.tail_window_bytes must be positive".into(),
            ));
        }
        if d.head_window_bytes == 0 {
            return Err(ConfigError::Invalid(
                "detector.head_window_bytes must be positive".into(),
            ));
        }
        if self.join.detection_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "join.detection_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn detector_config(&self) -> DetectorConfig {
        let d = &self.detector;
        DetectorConfig {
            tail_window_bytes: d.tail_window_bytes,
            head_window_bytes: d.head_window_bytes,
            recent_window: delta_from_secs(d.recent_window_secs),
            stale_after: delta_from_millis(d.stale_after_ms),
            whole_line_records: d.whole_line_records,
        }
    }

    /// Configured log directory, else the client's default location.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.detector.log_dir.clone().or_else(default_log_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(clamp_poll_interval_ms(self.detector.poll_interval_ms))
    }

    pub fn store_path(&self) -> Option<PathBuf> {
        self.join.store_path.clone().or_else(default_store_path)
    }
}
