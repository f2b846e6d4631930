//! Log file to account binding.
//!
//! The client writes the local account id into the head of each log once the
//! game join completes (`GameJoinLoadTime ... userid:<id>,`). Discovery reads
//! that head for every recently modified log and keeps the newest file per
//! account.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::source::LogSource;

static ACCOUNT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)GameJoinLoadTime.*?userid:(\d+),").expect("valid regex"));

/// A recent log file attributed to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogBinding {
    pub account_id: String,
    pub path: PathBuf,
    pub modified_at: DateTime<Utc>,
}

/// Account id written in a log head, if the join line is present.
pub fn account_id_from_head(head: &str) -> Option<&str> {
    ACCOUNT_ID
        .captures(head)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Every recent candidate whose head names an account, newest first.
///
/// Files modified more than `recent_window` before `now` are ignored. Unreadable
/// files are skipped; a listing failure yields nothing.
pub fn scan_candidates<S: LogSource + ?Sized>(
    source: &S,
    now: DateTime<Utc>,
    recent_window: TimeDelta,
    head_bytes: u64,
) -> Vec<LogBinding> {
    let entries = match source.list_candidate_files() {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "failed to list log files");
            return Vec::new();
        }
    };

    let mut bindings = Vec::new();
    for entry in entries {
        if now.signed_duration_since(entry.modified_at) > recent_window {
            continue;
        }

        let head = match source.read_head(&entry.path, head_bytes) {
            Ok(h) => h,
            Err(e) => {
                warn!(path = %entry.path.display(), error = %e, "failed to read log head");
                continue;
            }
        };

        let text = String::from_utf8_lossy(&head);
        match account_id_from_head(&text) {
            Some(id) => bindings.push(LogBinding {
                account_id: id.to_owned(),
                path: entry.path,
                modified_at: entry.modified_at,
            }),
            None => debug!(path = %entry.path.display(), "log head names no account"),
        }
    }

    bindings.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    bindings
}

/// Newest log file per account id.
pub fn discover_bindings<S: LogSource + ?Sized>(
    source: &S,
    now: DateTime<Utc>,
    recent_window: TimeDelta,
    head_bytes: u64,
) -> BTreeMap<String, PathBuf> {
    let mut newest: BTreeMap<String, LogBinding> = BTreeMap::new();
    for binding in scan_candidates(source, now, recent_window, head_bytes) {
        match newest.get(&binding.account_id) {
            Some(kept) if kept.modified_at >= binding.modified_at => {}
            _ => {
                newest.insert(binding.account_id.clone(), binding);
            }
        }
    }

    newest
        .into_iter()
        .map(|(id, binding)| (id, binding.path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogSourceError;
    use crate::source::LogFileEntry;
    use std::collections::HashMap;
    use std::path::Path;

    #[derive(Default)]
    struct FakeSource {
        files: Vec<LogFileEntry>,
        heads: HashMap<PathBuf, String>,
        fail_list: bool,
    }

    impl FakeSource {
        fn with(mut self, name: &str, modified_at: DateTime<Utc>, head: &str) -> Self {
            let path = PathBuf::from(format!("/logs/{name}"));
            self.files.push(LogFileEntry {
                path: path.clone(),
                modified_at,
            });
            self.heads.insert(path, head.to_owned());
            self
        }
    }

    impl LogSource for FakeSource {
        fn list_candidate_files(&self) -> Result<Vec<LogFileEntry>, LogSourceError> {
            if self.fail_list {
                return Err(LogSourceError::List {
                    dir: PathBuf::from("/logs"),
                    source: std::io::Error::other("denied"),
                });
            }
            Ok(self.files.clone())
        }

        fn read_head(&self, path: &Path, max_bytes: u64) -> Result<Vec<u8>, LogSourceError> {
            let head = self
                .heads
                .get(path)
                .ok_or_else(|| LogSourceError::NotFound(path.to_path_buf()))?;
            let end = head.len().min(max_bytes as usize);
            Ok(head.as_bytes()[..end].to_vec())
        }

        fn read_tail(&self, path: &Path, _max_bytes: u64) -> Result<Vec<u8>, LogSourceError> {
            Err(LogSourceError::NotFound(path.to_path_buf()))
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid")
            .with_timezone(&Utc)
    }

    fn head(id: &str) -> String {
        format!("... [FLog::GameJoinLoadTime] Report game_join_loadtime: placeid:1, userid:{id}, ...")
    }

    const WINDOW_SECS: i64 = 7200;

    fn window() -> TimeDelta {
        TimeDelta::seconds(WINDOW_SECS)
    }

    #[test]
    fn account_id_is_case_insensitive_and_spans_lines() {
        assert_eq!(account_id_from_head(&head("42")), Some("42"));
        assert_eq!(
            account_id_from_head("gamejoinloadtime\nfoo\nUserId:77, bar"),
            Some("77")
        );
        assert_eq!(account_id_from_head("userid:5, before the marker"), None);
    }

    #[test]
    fn newest_file_per_account_wins() {
        let now = ts("2026-03-01T12:00:00Z");
        let source = FakeSource::default()
            .with("old.log", ts("2026-03-01T11:00:00Z"), &head("1"))
            .with("new.log", ts("2026-03-01T11:30:00Z"), &head("1"))
            .with("other.log", ts("2026-03-01T11:10:00Z"), &head("2"));

        let map = discover_bindings(&source, now, window(), 1024);
        assert_eq!(map.len(), 2);
        assert_eq!(map["1"], PathBuf::from("/logs/new.log"));
        assert_eq!(map["2"], PathBuf::from("/logs/other.log"));
    }

    #[test]
    fn files_outside_recent_window_are_ignored() {
        let now = ts("2026-03-01T12:00:00Z");
        let source = FakeSource::default()
            .with("ancient.log", ts("2026-03-01T09:00:00Z"), &head("1"))
            .with("edge.log", ts("2026-03-01T10:00:00Z"), &head("2"));

        let map = discover_bindings(&source, now, window(), 1024);
        assert!(!map.contains_key("1"));
        assert!(map.contains_key("2"), "exactly at the window edge is kept");
    }

    #[test]
    fn heads_without_join_line_are_skipped() {
        let now = ts("2026-03-01T12:00:00Z");
        let source = FakeSource::default()
            .with("menu.log", ts("2026-03-01T11:59:00Z"), "launcher started");
        assert!(scan_candidates(&source, now, window(), 1024).is_empty());
    }

    #[test]
    fn head_window_limits_what_is_searched() {
        let now = ts("2026-03-01T12:00:00Z");
        let padded = format!("{}{}", "x".repeat(64), head("9"));
        let source = FakeSource::default().with("late.log", ts("2026-03-01T11:59:00Z"), &padded);
        assert!(discover_bindings(&source, now, window(), 32).is_empty());
        assert_eq!(discover_bindings(&source, now, window(), 4096).len(), 1);
    }

    #[test]
    fn listing_failure_yields_empty_map() {
        let source = FakeSource {
            fail_list: true,
            ..FakeSource::default()
        };
        assert!(discover_bindings(&source, ts("2026-03-01T12:00:00Z"), window(), 1024).is_empty());
    }
}
