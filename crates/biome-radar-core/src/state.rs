//! Per-account runtime state and the biome transition table.
//!
//! The detector feeds each account's fresh log signals, oldest first, through
//! [`AccountRuntimeState::apply_batch`]:
//!
//! - **Disconnect**: clears a known biome, emitting `BiomeChanged(old -> none)`
//!   followed by `ClientDisconnected`. Silent when no biome is known.
//! - **Record without biome**: noise, only the watermark advances.
//! - **Record with the known biome**: `BiomeDetected`, update time refreshed.
//! - **Record with a new biome**: `BiomeDetected`, then `BiomeChanged(old -> new)`.
//!
//! Signals at or before `last_seen_event_at` are duplicates of an earlier read
//! and are dropped.
//!
//! A tail whose newest signal is a disconnect goes through
//! [`AccountRuntimeState::apply_disconnected_batch`] instead: records are not
//! replayed and only the disconnect transition applies.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::types::DetectionEvent;

/// A timestamped observation extracted from a log tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// An event record; `biome` is `None` when the record carries no biome.
    Record {
        at: DateTime<Utc>,
        biome: Option<String>,
    },
    /// A client disconnect marker.
    Disconnect { at: DateTime<Utc> },
}

impl Signal {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Record { at, .. } | Self::Disconnect { at } => *at,
        }
    }
}

/// Runtime state of one tracked account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountRuntimeState {
    /// `None` when no biome is known (never detected, or disconnected).
    pub last_known_biome: Option<String>,
    /// Wall-clock time of the last write to `last_known_biome`.
    pub last_biome_update: Option<DateTime<Utc>>,
    /// Embedded timestamp of the newest signal already processed.
    pub last_seen_event_at: Option<DateTime<Utc>>,
}

impl AccountRuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a signal stamped `at` has not been processed yet.
    pub fn is_fresh(&self, at: DateTime<Utc>) -> bool {
        self.last_seen_event_at.is_none_or(|seen| at > seen)
    }

    /// Apply every fresh signal in `signals` (chronological order) and return
    /// the emitted events in order.
    ///
    /// Freshness is judged against the watermark at the start of the batch, so
    /// a disconnect stamped at the same instant as a record in the same batch
    /// is still applied.
    pub fn apply_batch(
        &mut self,
        account: &str,
        signals: &[Signal],
        now: DateTime<Utc>,
    ) -> Vec<DetectionEvent> {
        let watermark = self.last_seen_event_at;
        let mut events = Vec::new();
        for signal in signals
            .iter()
            .filter(|s| watermark.is_none_or(|seen| s.at() > seen))
        {
            events.extend(self.apply(account, signal, now));
        }
        events
    }

    /// Settle a batch whose client has already disconnected.
    ///
    /// No record is replayed. The watermark moves past every signal in the
    /// batch and the disconnect transition runs once, so the result is empty
    /// unless a biome was known.
    pub fn apply_disconnected_batch(
        &mut self,
        account: &str,
        signals: &[Signal],
        now: DateTime<Utc>,
    ) -> Vec<DetectionEvent> {
        if let Some(newest) = signals
            .iter()
            .map(Signal::at)
            .max()
            .filter(|&at| self.is_fresh(at))
        {
            self.last_seen_event_at = Some(newest);
        }
        self.disconnect(account, now)
    }

    /// Apply a single signal without a freshness check.
    pub fn apply(
        &mut self,
        account: &str,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> Vec<DetectionEvent> {
        let at = signal.at();
        if self.is_fresh(at) {
            self.last_seen_event_at = Some(at);
        }

        match signal {
            Signal::Disconnect { .. } => self.disconnect(account, now),
            Signal::Record { biome: None, .. } => Vec::new(),
            Signal::Record {
                biome: Some(biome), ..
            } => self.record_biome(account, biome, now),
        }
    }

    /// Transition into the disconnected state.
    ///
    /// Emits `BiomeChanged(old -> none)` and `ClientDisconnected` only when a
    /// biome was known; otherwise nothing happens.
    pub fn disconnect(&mut self, account: &str, now: DateTime<Utc>) -> Vec<DetectionEvent> {
        let Some(from) = self.last_known_biome.take() else {
            return Vec::new();
        };
        self.last_biome_update = Some(now);
        vec![
            DetectionEvent::BiomeChanged {
                account: account.to_owned(),
                from: Some(from),
                to: None,
            },
            DetectionEvent::ClientDisconnected {
                account: account.to_owned(),
            },
        ]
    }

    fn record_biome(
        &mut self,
        account: &str,
        biome: &str,
        now: DateTime<Utc>,
    ) -> Vec<DetectionEvent> {
        let mut events = vec![DetectionEvent::BiomeDetected {
            account: account.to_owned(),
            biome: biome.to_owned(),
        }];

        if self.last_known_biome.as_deref() != Some(biome) {
            events.push(DetectionEvent::BiomeChanged {
                account: account.to_owned(),
                from: self.last_known_biome.clone(),
                to: Some(biome.to_owned()),
            });
            self.last_known_biome = Some(biome.to_owned());
        }
        self.last_biome_update = Some(now);
        events
    }

    /// The known biome, unless it has not been confirmed within `stale_after`.
    pub fn current_biome(&self, now: DateTime<Utc>, stale_after: TimeDelta) -> Option<&str> {
        let biome = self.last_known_biome.as_deref()?;
        let updated = self.last_biome_update?;
        if now - updated > stale_after {
            return None;
        }
        Some(biome)
    }
}
