//! `biome-radar scan` and `biome-radar discover`: one-shot log inspection.

use std::path::{Path, PathBuf};

use biome_radar_source_log::{FsLogSource, LogBinding, TailScan, parse_tail, scan_candidates};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::{DiscoverOpts, ScanOpts};
use crate::config::Config;
use crate::context;

#[derive(Debug, Serialize)]
struct ScanReport<'a> {
    path: &'a Path,
    window_bytes: u64,
    whole_line_records: bool,
    latest_biome: Option<String>,
    #[serde(flatten)]
    scan: TailScan,
}

fn scan_report(path: &Path, window_bytes: u64, whole_line: bool) -> ScanReport<'_> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let scan = parse_tail(&FsLogSource::new(dir), path, window_bytes, whole_line);
    ScanReport {
        path,
        window_bytes,
        whole_line_records: whole_line,
        latest_biome: scan.latest_biome(),
        scan,
    }
}

pub async fn cmd_scan(config: &Config, opts: ScanOpts) -> anyhow::Result<()> {
    let window = opts
        .window_bytes
        .unwrap_or(config.detector.tail_window_bytes)
        .max(1);
    let whole_line = !opts.partial && config.detector.whole_line_records;
    let path = opts.path;

    let report = tokio::task::spawn_blocking(move || {
        let report = scan_report(&path, window, whole_line);
        serde_json::to_string_pretty(&report)
    })
    .await??;
    println!("{report}");
    Ok(())
}

#[derive(Debug, Serialize)]
struct DiscoverReport {
    log_dir: PathBuf,
    now: DateTime<Utc>,
    /// Every recent attributable log, newest first.
    candidates: Vec<LogBinding>,
}

fn discover_report(config: &Config, log_dir: PathBuf, now: DateTime<Utc>) -> DiscoverReport {
    let detector = config.detector_config();
    let candidates = scan_candidates(
        &FsLogSource::new(&log_dir),
        now,
        detector.recent_window,
        detector.head_window_bytes,
    );
    DiscoverReport {
        log_dir,
        now,
        candidates,
    }
}

pub async fn cmd_discover(config: &Config, opts: DiscoverOpts) -> anyhow::Result<()> {
    let log_dir = context::resolve_log_dir(config, opts.log_dir)?;
    let config = config.clone();
    let report =
        tokio::task::spawn_blocking(move || discover_report(&config, log_dir, Utc::now())).await?;
    context::print_json(&report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RPC: &str = r#"2026-03-01T10:00:00.000Z,5.0,ab,6 [FLog::Output] [BloxstrapRPC] {"command":"SetRichPresence","data":{"largeImage":{"hoverText":"WINDY"}}}"#;

    #[test]
    fn scan_report_flattens_the_scan() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("client.log");
        std::fs::write(
            &path,
            format!("{RPC}\n2026-03-01T10:00:01.000Z,6.0,ab,6 [FLog::Network] Client:Disconnect\n"),
        )
        .expect("test");

        let report = scan_report(&path, 4096, true);
        let value = serde_json::to_value(&report).expect("test");
        assert_eq!(value["latest_biome"], "WINDY");
        assert_eq!(value["effectively_disconnected"], true);
        assert_eq!(value["records"].as_array().map(Vec::len), Some(1));
        assert_eq!(
            value["most_recent_record_timestamp"],
            "2026-03-01T10:00:00.000Z"
        );
    }

    #[test]
    fn missing_file_scans_empty() {
        let report = scan_report(Path::new("/nonexistent/biome-radar.log"), 4096, true);
        assert!(report.scan.is_empty());
        assert_eq!(report.latest_biome, None);
    }

    #[test]
    fn discover_lists_attributable_logs() {
        let dir = tempfile::tempdir().expect("test");
        std::fs::write(
            dir.path().join("a.log"),
            "2026-03-01T09:59:00.000Z,0.1,ab,6 [FLog::GameJoinLoadTime] placeid:1, userid:1001, done\n",
        )
        .expect("test");
        std::fs::write(dir.path().join("b.log"), "no join yet\n").expect("test");

        let report = discover_report(&Config::default(), dir.path().to_path_buf(), Utc::now());
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].account_id, "1001");
    }
}
