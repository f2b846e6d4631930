//! Recent join history with verification tags, persisted as JSON.
//!
//! Newest entries first, capped at [`MAX_JOINS`]. Tags accumulate as a join
//! is verified (link check first, then biome check).

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MAX_JOINS: usize = 50;

#[derive(Debug, Error)]
pub enum JoinStoreError {
    #[error("join store io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode join store: {0}")]
    Encode(#[from] serde_json::Error),
}

// ─── Tags ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum JoinTag {
    BiomeVerifiedReal,
    BiomeVerifiedBait,
    BiomeVerifiedTimeout,
    BiomeNotVerified,
    LinkVerifiedSafe,
    LinkVerifiedUnsafe,
    LinkNotVerified,
    Unknown,
    Failed,
}

impl JoinTag {
    /// Display priority; the highest-priority tag summarizes a join.
    pub fn priority(self) -> u32 {
        match self {
            Self::BiomeVerifiedReal | Self::BiomeVerifiedBait => 60,
            Self::BiomeVerifiedTimeout | Self::BiomeNotVerified => 49,
            Self::LinkVerifiedSafe
            | Self::LinkVerifiedUnsafe
            | Self::LinkNotVerified
            | Self::Unknown
            | Self::Failed => 50,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::BiomeVerifiedReal => "Real",
            Self::BiomeVerifiedBait => "Bait",
            Self::BiomeVerifiedTimeout => "Biome check timeout",
            Self::BiomeNotVerified => "Biome check disabled",
            Self::LinkVerifiedSafe => "Verified link",
            Self::LinkVerifiedUnsafe => "Unsafe link",
            Self::LinkNotVerified => "Unverified link",
            Self::Unknown => "Unknown",
            Self::Failed => "Failed to join",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BiomeVerifiedReal => "biome-verified-real",
            Self::BiomeVerifiedBait => "biome-verified-bait",
            Self::BiomeVerifiedTimeout => "biome-verified-timeout",
            Self::BiomeNotVerified => "biome-not-verified",
            Self::LinkVerifiedSafe => "link-verified-safe",
            Self::LinkVerifiedUnsafe => "link-verified-unsafe",
            Self::LinkNotVerified => "link-not-verified",
            Self::Unknown => "unknown",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JoinTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Entries ────────────────────────────────────────────────────────

pub type JoinId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentJoin {
    pub id: JoinId,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<JoinTag>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RecentJoin {
    /// Highest-priority tag; the earliest wins ties. `Unknown` when untagged.
    pub fn primary_tag(&self) -> JoinTag {
        self.tags
            .iter()
            .copied()
            .reduce(|best, t| if t.priority() > best.priority() { t } else { best })
            .unwrap_or(JoinTag::Unknown)
    }
}

/// Fields of a join at creation time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewJoin {
    pub title: String,
    pub description: Option<String>,
    pub server_id: Option<String>,
    pub author_name: Option<String>,
    pub author_id: Option<String>,
    pub message_url: Option<String>,
    pub tags: Vec<JoinTag>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Partial update; `None` fields are left alone. Metadata keys are merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub server_id: Option<String>,
    pub tags: Option<Vec<JoinTag>>,
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

fn merge_tags(current: &[JoinTag], extra: &[JoinTag]) -> Vec<JoinTag> {
    let mut merged = current.to_vec();
    for tag in extra {
        if !merged.contains(tag) {
            merged.push(*tag);
        }
    }
    merged
}

// ─── Store ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinStore {
    joins: Vec<RecentJoin>,
}

impl JoinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a join at `now`. Ids are millisecond timestamps, bumped when
    /// two joins land in the same millisecond.
    pub fn add(&mut self, join: NewJoin, now: DateTime<Utc>) -> JoinId {
        let newest = self.joins.iter().map(|j| j.id).max().unwrap_or(i64::MIN);
        let id = now.timestamp_millis().max(newest.saturating_add(1));

        self.joins.insert(
            0,
            RecentJoin {
                id,
                timestamp: now,
                title: join.title,
                description: join.description,
                server_id: join.server_id,
                author_name: join.author_name,
                author_id: join.author_id,
                message_url: join.message_url,
                tags: merge_tags(&[], &join.tags),
                metadata: join.metadata,
            },
        );
        self.joins.truncate(MAX_JOINS);
        id
    }

    pub fn get(&self, id: JoinId) -> Option<&RecentJoin> {
        self.joins.iter().find(|j| j.id == id)
    }

    pub fn by_server_id(&self, server_id: &str) -> Option<&RecentJoin> {
        self.joins
            .iter()
            .find(|j| j.server_id.as_deref() == Some(server_id))
    }

    pub fn by_tag(&self, tag: JoinTag) -> Vec<&RecentJoin> {
        self.joins.iter().filter(|j| j.tags.contains(&tag)).collect()
    }

    /// The newest `limit` joins.
    pub fn recent(&self, limit: usize) -> &[RecentJoin] {
        &self.joins[..limit.min(self.joins.len())]
    }

    pub fn all(&self) -> &[RecentJoin] {
        &self.joins
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Apply `update` to join `id`. Tags are merged unless `replace_tags`.
    pub fn update(&mut self, id: JoinId, update: JoinUpdate, replace_tags: bool) -> bool {
        let Some(join) = self.joins.iter_mut().find(|j| j.id == id) else {
            return false;
        };
        if let Some(title) = update.title {
            join.title = title;
        }
        if let Some(description) = update.description {
            join.description = Some(description);
        }
        if let Some(server_id) = update.server_id {
            join.server_id = Some(server_id);
        }
        if let Some(tags) = update.tags {
            join.tags = if replace_tags {
                merge_tags(&[], &tags)
            } else {
                merge_tags(&join.tags, &tags)
            };
        }
        if let Some(metadata) = update.metadata {
            join.metadata.extend(metadata);
        }
        true
    }

    pub fn add_tags(&mut self, id: JoinId, tags: &[JoinTag]) -> bool {
        let update = JoinUpdate {
            tags: Some(tags.to_vec()),
            ..JoinUpdate::default()
        };
        self.update(id, update, false)
    }

    pub fn remove_tags(&mut self, id: JoinId, tags: &[JoinTag]) -> bool {
        let Some(join) = self.get(id) else {
            return false;
        };
        let kept: Vec<JoinTag> = join
            .tags
            .iter()
            .copied()
            .filter(|t| !tags.contains(t))
            .collect();
        self.set_tags(id, &kept)
    }

    pub fn set_tags(&mut self, id: JoinId, tags: &[JoinTag]) -> bool {
        let update = JoinUpdate {
            tags: Some(tags.to_vec()),
            ..JoinUpdate::default()
        };
        self.update(id, update, true)
    }

    pub fn delete(&mut self, id: JoinId) -> bool {
        let before = self.joins.len();
        self.joins.retain(|j| j.id != id);
        self.joins.len() != before
    }

    pub fn clear(&mut self) {
        self.joins.clear();
    }

    /// Drop joins recorded `days` or more before `now`. Returns the count.
    pub fn clean_older_than(&mut self, days: u32, now: DateTime<Utc>) -> usize {
        let cutoff = now - TimeDelta::days(i64::from(days));
        let before = self.joins.len();
        self.joins.retain(|j| j.timestamp > cutoff);
        let removed = before - self.joins.len();
        if removed > 0 {
            debug!(removed, days, "old joins cleaned");
        }
        removed
    }

    // ─── Persistence ────────────────────────────────────────────────

    pub fn save(&self, path: &Path) -> Result<(), JoinStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| JoinStoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(&self.joins)?;
        std::fs::write(path, json).map_err(|source| JoinStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), joins = self.joins.len(), "join store saved");
        Ok(())
    }

    /// Load a saved store. A missing file is an empty store; an unreadable or
    /// corrupt one is logged and replaced by an empty store.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no join store yet");
                return Self::new();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read join store");
                return Self::new();
            }
        };

        match serde_json::from_str::<Vec<RecentJoin>>(&text) {
            Ok(mut joins) => {
                joins.truncate(MAX_JOINS);
                debug!(path = %path.display(), joins = joins.len(), "join store loaded");
                Self { joins }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt join store; starting empty");
                Self::new()
            }
        }
    }
}
