//! Trailing-window scan of one client log file.
//!
//! Only the last `window_bytes` of the file are read. The scan never fails:
//! IO and decode problems degrade to an empty, not-disconnected result.

use std::path::Path;
use std::sync::LazyLock;

use biome_radar_core::Signal;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::record::{self, DISCONNECT_MARKER, RECORD_CLOSE, RECORD_MARKER};
use crate::source::LogSource;

static DISCONNECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(\d{{4}}-\d{{2}}-\d{{2}}T\d{{2}}:\d{{2}}:\d{{2}}\.\d{{3}}Z).*{}",
        regex::escape(DISCONNECT_MARKER)
    ))
    .expect("valid regex")
});

/// Result of scanning a log tail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TailScan {
    /// Event records, oldest to newest.
    pub records: Vec<String>,
    /// Timestamps of disconnect lines, in file order.
    pub disconnects: Vec<String>,
    /// A disconnect exists and no record is strictly newer than it.
    pub effectively_disconnected: bool,
    /// Leading timestamp of the line holding the newest record, when it has one.
    pub most_recent_record_timestamp: Option<String>,
    /// Timestamp of the line each record was found on.
    #[serde(skip)]
    record_times: Vec<Option<DateTime<Utc>>>,
}

impl TailScan {
    /// Scan already-decoded tail text.
    ///
    /// With `whole_line` each record is the full line holding the marker, one
    /// per line. Otherwise a record runs from the marker through the first
    /// closing `}}}` after it, and a marker without one is dropped.
    pub fn from_text(text: &str, whole_line: bool) -> Self {
        let mut records = Vec::new();
        let mut record_times = Vec::new();
        let mut newest_stamp = None;
        let mut last_line_start = None;

        for (idx, _) in text.match_indices(RECORD_MARKER) {
            let line_start = text[..idx].rfind('\n').map_or(0, |i| i + 1);
            let line_end = text[idx..].find('\n').map_or(text.len(), |i| idx + i);
            let line = text[line_start..line_end].trim_end_matches('\r');

            let record = if whole_line {
                if last_line_start == Some(line_start) {
                    continue;
                }
                last_line_start = Some(line_start);
                line
            } else {
                match text[idx..].find(RECORD_CLOSE) {
                    Some(pos) => &text[idx..idx + pos + RECORD_CLOSE.len()],
                    None => continue,
                }
            };

            let stamp = record::leading_timestamp(line);
            records.push(record.to_owned());
            record_times.push(stamp.and_then(record::parse_timestamp));
            newest_stamp = stamp;
        }

        let disconnects: Vec<String> = DISCONNECT
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_owned()))
            .collect();

        let most_recent_record_timestamp = newest_stamp.map(str::to_owned);

        let newest_record_at = record_times.last().copied().flatten();
        let effectively_disconnected = match disconnects
            .last()
            .and_then(|d| record::parse_timestamp(d))
        {
            Some(disconnect_at) => newest_record_at.is_none_or(|at| at <= disconnect_at),
            None => false,
        };

        Self {
            records,
            disconnects,
            effectively_disconnected,
            most_recent_record_timestamp,
            record_times,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.disconnects.is_empty()
    }

    /// Records and disconnects merged into one chronological signal list.
    ///
    /// At equal timestamps a disconnect sorts after the record. Records whose
    /// line carries no parsable timestamp are skipped.
    pub fn signals(&self) -> Vec<Signal> {
        let mut signals = Vec::with_capacity(self.records.len() + self.disconnects.len());

        for (rec, at) in self.records.iter().zip(&self.record_times) {
            match at {
                Some(at) => signals.push(Signal::Record {
                    at: *at,
                    biome: record::biome_from_record(rec),
                }),
                None => warn!(record = %truncate(rec, 80), "record without timestamp skipped"),
            }
        }
        for raw in &self.disconnects {
            if let Some(at) = record::parse_timestamp(raw) {
                signals.push(Signal::Disconnect { at });
            }
        }

        signals.sort_by_key(|s| {
            let rank = match s {
                Signal::Record { .. } => 0u8,
                Signal::Disconnect { .. } => 1,
            };
            (s.at(), rank)
        });
        signals
    }

    /// Biome named by the newest record, if any.
    pub fn latest_biome(&self) -> Option<String> {
        self.records.last().and_then(|r| record::biome_from_record(r))
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Read the last `window_bytes` of `path` and scan them.
pub fn parse_tail<S: LogSource + ?Sized>(
    source: &S,
    path: &Path,
    window_bytes: u64,
    whole_line: bool,
) -> TailScan {
    let bytes = match source.read_tail(path, window_bytes) {
        Ok(b) => b,
        Err(e) if e.is_not_found() => {
            debug!(path = %path.display(), "log file vanished; empty scan");
            return TailScan::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read log tail");
            return TailScan::default();
        }
    };

    // the window start may cut a multi-byte sequence
    let text = String::from_utf8_lossy(&bytes);
    TailScan::from_text(&text, whole_line)
}
