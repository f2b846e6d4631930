//! Event record format embedded in client log lines.
//!
//! A record line looks like
//! `2026-03-01T10:00:00.000Z,0.5,1a2b,6 [FLog::Output] [BloxstrapRPC] {"command":...}`:
//! a leading ISO-8601 millisecond timestamp, the record marker, then a JSON
//! object whose `data.largeImage.hoverText` names the biome.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// Marker that introduces an event record.
pub const RECORD_MARKER: &str = "[BloxstrapRPC]";

/// Closing sequence of a record's JSON object (partial extraction mode).
pub const RECORD_CLOSE: &str = "}}}";

/// Literal that marks a client disconnect line.
pub const DISCONNECT_MARKER: &str = "Client:Disconnect";

static LEADING_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z)").expect("valid regex")
});

#[derive(Debug, Deserialize)]
struct RecordPayload {
    #[serde(default)]
    data: Option<RecordData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordData {
    #[serde(default)]
    large_image: Option<LargeImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LargeImage {
    #[serde(default)]
    hover_text: Option<String>,
}

/// The timestamp a record line starts with, verbatim.
pub fn leading_timestamp(record: &str) -> Option<&str> {
    LEADING_TIMESTAMP
        .captures(record)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Parse an ISO-8601 timestamp as written by the client.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Biome named by a record, if its JSON payload carries one.
///
/// Parses the first JSON value starting at the first `{` and ignores any
/// trailing text. Malformed payloads yield `None`.
pub fn biome_from_record(record: &str) -> Option<String> {
    let start = record.find('{')?;
    let mut stream =
        serde_json::Deserializer::from_str(&record[start..]).into_iter::<RecordPayload>();

    let payload = match stream.next()? {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "record payload is not valid JSON");
            return None;
        }
    };

    payload
        .data
        .and_then(|d| d.large_image)
        .and_then(|img| img.hover_text)
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = r#"2026-03-01T10:00:00.000Z,12.345,a1b2,6 [FLog::Output] [BloxstrapRPC] {"command":"SetRichPresence","data":{"details":"x","largeImage":{"assetId":1,"hoverText":"HELL"},"smallImage":{"hoverText":"Sol's RNG"}}}"#;

    #[test]
    fn extracts_leading_timestamp() {
        assert_eq!(leading_timestamp(LINE), Some("2026-03-01T10:00:00.000Z"));
        assert_eq!(leading_timestamp("[BloxstrapRPC] {}"), None);
    }

    #[test]
    fn leading_timestamp_parses_as_utc() {
        let at = leading_timestamp(LINE)
            .and_then(parse_timestamp)
            .expect("timestamp");
        assert_eq!(at.to_rfc3339(), "2026-03-01T10:00:00+00:00");
    }

    #[test]
    fn extracts_biome_from_nested_hover_text() {
        assert_eq!(biome_from_record(LINE).as_deref(), Some("HELL"));
    }

    #[test]
    fn trailing_text_after_json_is_ignored() {
        let rec = r#"[BloxstrapRPC] {"data":{"largeImage":{"hoverText":"NULL"}}} trailing junk"#;
        assert_eq!(biome_from_record(rec).as_deref(), Some("NULL"));
    }

    #[test]
    fn malformed_or_missing_payload_is_no_biome() {
        assert_eq!(biome_from_record("[BloxstrapRPC] {\"data\":{\"largeIm"), None);
        assert_eq!(biome_from_record("[BloxstrapRPC] no json here"), None);
        assert_eq!(biome_from_record(r#"[BloxstrapRPC] {"data":{}}"#), None);
        assert_eq!(
            biome_from_record(r#"[BloxstrapRPC] {"data":{"largeImage":{"hoverText":7}}}"#),
            None
        );
        assert_eq!(
            biome_from_record(r#"[BloxstrapRPC] {"data":{"largeImage":{"hoverText":""}}}"#),
            None
        );
    }
}
