use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ─── Accounts ───────────────────────────────────────────────────────

/// An account the detector watches, keyed by the game's stable account id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedAccount {
    pub account_id: String,
    pub display_name: String,
}

impl TrackedAccount {
    pub fn new(account_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Staleness-aware biome of one tracked account at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountBiome {
    pub display_name: String,
    pub biome: Option<String>,
}

// ─── Detection events ───────────────────────────────────────────────

/// Discriminant of [`DetectionEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionEventKind {
    BiomeDetected,
    BiomeChanged,
    ClientDisconnected,
    LogFileChanged,
}

impl DetectionEventKind {
    pub const ALL: [Self; 4] = [
        Self::BiomeDetected,
        Self::BiomeChanged,
        Self::ClientDisconnected,
        Self::LogFileChanged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BiomeDetected => "biome_detected",
            Self::BiomeChanged => "biome_changed",
            Self::ClientDisconnected => "client_disconnected",
            Self::LogFileChanged => "log_file_changed",
        }
    }
}

impl fmt::Display for DetectionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted by the detector. `account` is always the display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectionEvent {
    BiomeDetected {
        account: String,
        biome: String,
    },
    BiomeChanged {
        account: String,
        from: Option<String>,
        to: Option<String>,
    },
    ClientDisconnected {
        account: String,
    },
    LogFileChanged {
        account: String,
        log_path: PathBuf,
    },
}

impl DetectionEvent {
    pub fn kind(&self) -> DetectionEventKind {
        match self {
            Self::BiomeDetected { .. } => DetectionEventKind::BiomeDetected,
            Self::BiomeChanged { .. } => DetectionEventKind::BiomeChanged,
            Self::ClientDisconnected { .. } => DetectionEventKind::ClientDisconnected,
            Self::LogFileChanged { .. } => DetectionEventKind::LogFileChanged,
        }
    }

    pub fn account(&self) -> &str {
        match self {
            Self::BiomeDetected { account, .. }
            | Self::BiomeChanged { account, .. }
            | Self::ClientDisconnected { account }
            | Self::LogFileChanged { account, .. } => account,
        }
    }
}
