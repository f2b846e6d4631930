//! Tuning constants shared by the detector, the CLI and the config layer.

/// Default detector poll interval (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Lower bound for the poll interval; shorter values are clamped.
pub const MIN_POLL_INTERVAL_MS: u64 = 250;

/// A biome with no confirming record for longer than this is stale.
pub const STALE_THRESHOLD_MS: i64 = 60_000;

/// Trailing window read from each log file per cycle (2 MiB).
pub const TAIL_WINDOW_BYTES: u64 = 2 * 1024 * 1024;

/// Leading window read from each log file to find its account id (1 MiB).
pub const HEAD_WINDOW_BYTES: u64 = 1024 * 1024;

/// Log files older than this are not considered during discovery.
pub const RECENT_LOG_WINDOW_SECS: u64 = 7200;

/// Maximum time to wait for a biome confirmation after a join.
pub const DETECTION_TIMEOUT_MS: u64 = 30_000;

/// Maximum time to wait for a confirmed biome to end.
pub const BIOME_END_TIMEOUT_MS: u64 = 1_800_000;

/// Highest join cooldown priority. Arming a priority arms every level below
/// it, so larger requests are clamped to this.
pub const MAX_PRIORITY: u32 = 100;

/// Clamp a requested poll interval to the supported minimum.
pub fn clamp_poll_interval_ms(requested: u64) -> u64 {
    requested.max(MIN_POLL_INTERVAL_MS)
}
