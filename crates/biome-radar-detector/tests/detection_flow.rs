//! End-to-end detection against real files in a temp log directory.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use biome_radar_core::{DetectionEvent, DetectionEventKind};
use biome_radar_detector::{AccountLookup, BiomeDetector, DetectorConfig, LookupError, WaitError};
use biome_radar_source_log::FsLogSource;
use chrono::{TimeDelta, Utc};

struct Names;

impl AccountLookup for Names {
    async fn resolve_ids(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, Option<String>>, LookupError> {
        Ok(names
            .iter()
            .map(|n| {
                let id = match n.as_str() {
                    "alice" => Some("1001".to_owned()),
                    "bob" => Some("1002".to_owned()),
                    _ => None,
                };
                (n.clone(), id)
            })
            .collect())
    }
}

fn join_line(id: &str) -> String {
    format!(
        "2026-03-01T09:59:00.000Z,0.1,ab,6 [FLog::GameJoinLoadTime] Report game_join_loadtime: placeid:15532962292, userid:{id}, ...\n"
    )
}

fn rpc_line(ts: &str, biome: &str) -> String {
    format!(
        "{ts},5.0,ab,6 [FLog::Output] [BloxstrapRPC] {{\"command\":\"SetRichPresence\",\"data\":{{\"largeImage\":{{\"hoverText\":\"{biome}\"}}}}}}\n"
    )
}

fn append(path: &Path, text: &str) {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("test");
    f.write_all(text.as_bytes()).expect("test");
}

fn collect(detector: &BiomeDetector<FsLogSource>) -> Arc<Mutex<Vec<DetectionEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in DetectionEventKind::ALL {
        let sink = Arc::clone(&seen);
        detector.bus().on(kind, move |e: &DetectionEvent| {
            sink.lock().expect("test").push(e.clone());
        });
    }
    seen
}

#[tokio::test]
async fn two_accounts_tracked_from_their_own_logs() {
    let dir = tempfile::tempdir().expect("test");
    let alice_log = dir.path().join("0.680_20260301T095900Z_Player_a1_last.log");
    let bob_log = dir.path().join("0.680_20260301T095901Z_Player_b2_last.log");
    append(&alice_log, &join_line("1001"));
    append(&bob_log, &join_line("1002"));

    let detector = BiomeDetector::new(FsLogSource::new(dir.path()), DetectorConfig::default());
    let tracked = detector
        .set_accounts(&Names, &["alice".to_owned(), "bob".to_owned(), "carol".to_owned()])
        .await;
    assert_eq!(tracked, 2);
    let seen = collect(&detector);

    append(&alice_log, &rpc_line("2026-03-01T10:00:00.000Z", "WINDY"));
    append(&bob_log, &rpc_line("2026-03-01T10:00:01.000Z", "RAINY"));
    detector.run_cycle().await;

    let events = seen.lock().expect("test").clone();
    let changed_files = events
        .iter()
        .filter(|e| e.kind() == DetectionEventKind::LogFileChanged)
        .count();
    assert_eq!(changed_files, 2);

    let now = Utc::now();
    let stale = TimeDelta::seconds(60);
    assert_eq!(detector.current_biome("1001", now, stale).as_deref(), Some("WINDY"));
    assert_eq!(detector.current_biome("1002", now, stale).as_deref(), Some("RAINY"));
    assert!(detector.is_account_in_biome("bob", "rainy", now));
}

#[tokio::test]
async fn disconnect_then_rejoin_in_one_read() {
    let dir = tempfile::tempdir().expect("test");
    let log = dir.path().join("client.log");
    append(&log, &join_line("1001"));
    append(&log, &rpc_line("2026-03-01T10:00:00.000Z", "HELL"));
    append(
        &log,
        "2026-03-01T10:00:10.000Z,6.0,ab,6 [FLog::Network] Client:Disconnect\n",
    );
    append(&log, &rpc_line("2026-03-01T10:00:20.000Z", "HELL"));

    let detector = BiomeDetector::new(FsLogSource::new(dir.path()), DetectorConfig::default());
    detector.set_accounts(&Names, &["alice".to_owned()]).await;
    let seen = collect(&detector);
    detector.run_cycle().await;

    let kinds: Vec<_> = seen
        .lock()
        .expect("test")
        .iter()
        .map(DetectionEvent::kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            DetectionEventKind::LogFileChanged,
            DetectionEventKind::BiomeDetected,
            DetectionEventKind::BiomeChanged,
            DetectionEventKind::BiomeChanged,
            DetectionEventKind::ClientDisconnected,
            DetectionEventKind::BiomeDetected,
            DetectionEventKind::BiomeChanged,
        ]
    );
    assert_eq!(
        detector
            .current_biome("1001", Utc::now(), TimeDelta::seconds(60))
            .as_deref(),
        Some("HELL")
    );
}

#[tokio::test]
async fn cleared_scope_cancels_detector_waits() {
    let dir = tempfile::tempdir().expect("test");
    let detector = BiomeDetector::new(FsLogSource::new(dir.path()), DetectorConfig::default());
    let wait = detector.wait_for(
        DetectionEventKind::BiomeDetected,
        Duration::from_secs(5),
        "scopeA",
    );
    assert_eq!(detector.clear_scope("scopeA"), 1);
    assert_eq!(
        wait.await,
        Err(WaitError::Cancelled {
            scope: "scopeA".into()
        })
    );
}

#[tokio::test]
async fn missing_log_dir_is_quiet() {
    let detector = BiomeDetector::new(
        FsLogSource::new("/nonexistent/biome-radar/logs"),
        DetectorConfig::default(),
    );
    detector.set_accounts(&Names, &["alice".to_owned()]).await;
    let seen = collect(&detector);
    detector.run_cycle().await;
    assert!(seen.lock().expect("test").is_empty());
    assert!(detector.log_bindings().is_empty());
}
