//! biome-radar-core: domain types for biome detection.
//! Tracked accounts, detection events, the per-account transition table
//! and the join cooldown table. No IO, no async.

pub mod cooldown;
pub mod defaults;
pub mod state;
pub mod types;

pub use cooldown::JoinCooldowns;
pub use state::{AccountRuntimeState, Signal};
pub use types::{AccountBiome, DetectionEvent, DetectionEventKind, TrackedAccount};
