//! Priority-indexed join cooldowns.
//!
//! Arming priority `p` arms every priority in `1..=p`, so a rare outcome
//! suppresses all less rare ones below it but never the ones above. Expiries
//! only move forward; expired entries are swept lazily on every read/write.
//! Priorities above [`MAX_PRIORITY`] are treated as `MAX_PRIORITY`.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::defaults::MAX_PRIORITY;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinCooldowns {
    ends: BTreeMap<u32, DateTime<Utc>>,
}

impl JoinCooldowns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an action at `priority` is allowed at `now`.
    pub fn can_proceed(&mut self, priority: u32, now: DateTime<Utc>) -> bool {
        self.sweep(now);
        let priority = priority.min(MAX_PRIORITY);
        let allowed = self.ends.get(&priority).is_none_or(|end| now >= *end);
        debug!(priority, allowed, remaining = self.ends.len(), "cooldown check");
        allowed
    }

    /// Arm the cooldown for every priority in `1..=priority`.
    ///
    /// Returns how many priorities had their expiry pushed forward.
    pub fn set_cooldown(&mut self, priority: u32, duration_secs: u64, now: DateTime<Utc>) -> usize {
        self.sweep(now);
        if priority > MAX_PRIORITY {
            warn!(priority, max = MAX_PRIORITY, "cooldown priority clamped");
        }
        let priority = priority.min(MAX_PRIORITY);
        let secs = i64::try_from(duration_secs).unwrap_or(i64::MAX);
        let end = now
            .checked_add_signed(TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut raised = 0;
        for p in 1..=priority {
            match self.ends.get_mut(&p) {
                Some(current) if *current >= end => {}
                Some(current) => {
                    *current = end;
                    raised += 1;
                }
                None => {
                    self.ends.insert(p, end);
                    raised += 1;
                }
            }
        }
        debug!(priority, duration_secs, raised, total = self.ends.len(), "cooldown armed");
        raised
    }

    /// Drop every cooldown.
    pub fn clear_all(&mut self) {
        self.ends.clear();
    }

    /// Expiry currently recorded for `priority`, if any.
    pub fn expiry(&self, priority: u32) -> Option<DateTime<Utc>> {
        self.ends.get(&priority).copied()
    }

    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    /// Remove every entry whose expiry has passed. Returns the removed count.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.ends.len();
        self.ends.retain(|_, end| *end > now);
        let removed = before - self.ends.len();
        if removed > 0 {
            debug!(removed, remaining = self.ends.len(), "expired cooldowns swept");
        }
        removed
    }
}
