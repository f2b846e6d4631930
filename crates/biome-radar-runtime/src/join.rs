//! Join admission and biome verification.
//!
//! A join request passes [`JoinPipeline::admit`] (trigger enabled, cooldown
//! clear, no account already in the biome), the caller joins, and
//! [`JoinPipeline::record_join`] stores the attempt and watches the detector
//! to tag it real, bait, or timed out.

use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use biome_radar_core::{DetectionEvent, DetectionEventKind, JoinCooldowns};
use biome_radar_detector::{BiomeDetector, PendingWait, WaitError};
use biome_radar_source_log::LogSource;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::join_store::{JoinId, JoinStore, JoinTag, NewJoin};

/// Bus scope of verification waits. Cleared before every new verification.
pub const DETECTION_SCOPE: &str = "biome-detector-temporary";

static BYPASS_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(fresh|popping|started)\b").expect("valid regex"));

/// Whether a join message asks to skip the already-in-biome check.
pub fn bypass_requested(message: &str) -> bool {
    BYPASS_WORDS.is_match(message)
}

// ─── Triggers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    RareBiome,
    EventBiome,
    NormalBiome,
    Weather,
    Merchant,
    Special,
}

impl TriggerKind {
    /// Triggers the detector can confirm from the client log.
    pub fn is_biome(self) -> bool {
        matches!(
            self,
            Self::RareBiome | Self::EventBiome | Self::NormalBiome | Self::Weather
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// Biome (or item) name as it appears in the client's presence text.
    pub name: String,
    pub kind: TriggerKind,
    pub priority: u32,
    pub cooldown_secs: u64,
    pub join_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    pub trigger: Trigger,
    pub bypass_redundant: bool,
    pub details: NewJoin,
}

// ─── Results ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "admission", rename_all = "snake_case")]
pub enum Admission {
    Allowed,
    Disabled,
    CoolingDown { priority: u32 },
    AlreadyInBiome { biome: String },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LinkCheck {
    #[default]
    NotVerified,
    Safe,
    Unsafe,
}

impl LinkCheck {
    fn tag(self) -> JoinTag {
        match self {
            Self::NotVerified => JoinTag::LinkNotVerified,
            Self::Safe => JoinTag::LinkVerifiedSafe,
            Self::Unsafe => JoinTag::LinkVerifiedUnsafe,
        }
    }
}

/// What happened when the caller tried to join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub joined: bool,
    pub link: LinkCheck,
}

impl JoinOutcome {
    pub fn is_bait(&self) -> bool {
        self.link == LinkCheck::Unsafe
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Detection is off or no account is tracked.
    NotVerified,
    /// Nothing to verify: not a biome trigger, not joined, or a bait link.
    Skipped,
    Real { biome: String, elapsed_ms: u64 },
    Bait { expected: String, detected: String },
    Timeout,
    /// A newer verification cleared the scope.
    Cancelled,
}

// ─── Pipeline ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSettings {
    pub joins_enabled: bool,
    pub detection_enabled: bool,
    pub stop_redundant_joins: bool,
    pub detection_timeout: Duration,
    pub biome_end_timeout: Duration,
}

impl JoinSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            joins_enabled: config.join.enabled,
            detection_enabled: config.detector.enabled,
            stop_redundant_joins: config.join.stop_redundant_joins,
            detection_timeout: Duration::from_millis(config.join.detection_timeout_ms),
            biome_end_timeout: Duration::from_millis(config.join.biome_end_timeout_ms),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct JoinPipeline<S> {
    detector: Arc<BiomeDetector<S>>,
    cooldowns: Arc<Mutex<JoinCooldowns>>,
    store: Arc<Mutex<JoinStore>>,
    settings: JoinSettings,
}

impl<S: LogSource + 'static> JoinPipeline<S> {
    pub fn new(detector: Arc<BiomeDetector<S>>, store: JoinStore, settings: JoinSettings) -> Self {
        Self {
            detector,
            cooldowns: Arc::new(Mutex::new(JoinCooldowns::new())),
            store: Arc::new(Mutex::new(store)),
            settings,
        }
    }

    pub fn detector(&self) -> &Arc<BiomeDetector<S>> {
        &self.detector
    }

    pub fn cooldowns(&self) -> &Arc<Mutex<JoinCooldowns>> {
        &self.cooldowns
    }

    pub fn store(&self) -> &Arc<Mutex<JoinStore>> {
        &self.store
    }

    pub fn admit(&self, request: &JoinRequest, now: DateTime<Utc>) -> Admission {
        let trigger = &request.trigger;
        if !self.settings.joins_enabled || !trigger.join_enabled {
            return Admission::Disabled;
        }
        if !lock(&self.cooldowns).can_proceed(trigger.priority, now) {
            debug!(trigger = %trigger.name, priority = trigger.priority, "join on cooldown");
            return Admission::CoolingDown {
                priority: trigger.priority,
            };
        }
        if self.settings.stop_redundant_joins
            && self.settings.detection_enabled
            && trigger.kind.is_biome()
            && !request.bypass_redundant
            && self.detector.is_any_account_in_biome(&trigger.name, now)
        {
            info!(biome = %trigger.name, "an account is already in this biome; join skipped");
            return Admission::AlreadyInBiome {
                biome: trigger.name.clone(),
            };
        }
        Admission::Allowed
    }

    /// Store the join attempt and start verifying it.
    ///
    /// The detection wait is registered before this returns, so events from
    /// any later detector cycle are seen. Must be called within a Tokio
    /// runtime.
    pub fn record_join(
        &self,
        request: &JoinRequest,
        outcome: &JoinOutcome,
        now: DateTime<Utc>,
    ) -> (JoinId, JoinHandle<Verdict>) {
        let trigger = &request.trigger;
        let mut details = request.details.clone();
        details.tags.push(outcome.link.tag());
        if !outcome.joined {
            details.tags.push(JoinTag::Failed);
        }
        let id = lock(&self.store).add(details, now);

        if outcome.joined && !outcome.is_bait() {
            lock(&self.cooldowns).set_cooldown(trigger.priority, trigger.cooldown_secs, now);
        }
        info!(
            join_id = id,
            trigger = %trigger.name,
            joined = outcome.joined,
            link = ?outcome.link,
            "join recorded"
        );

        if !self.settings.detection_enabled || self.detector.tracked_accounts().is_empty() {
            lock(&self.store).add_tags(id, &[JoinTag::BiomeNotVerified]);
            return (id, tokio::spawn(async { Verdict::NotVerified }));
        }

        let cancelled = self.detector.clear_scope(DETECTION_SCOPE);
        if cancelled > 0 {
            debug!(cancelled, "previous verification superseded");
        }

        if !trigger.kind.is_biome() || !outcome.joined || outcome.is_bait() {
            return (id, tokio::spawn(async { Verdict::Skipped }));
        }

        let wait = self.detector.wait_for(
            DetectionEventKind::BiomeDetected,
            self.settings.detection_timeout,
            DETECTION_SCOPE,
        );
        let verify = Verification {
            id,
            expected: trigger.name.clone(),
            detector: Arc::downgrade(&self.detector),
            cooldowns: Arc::clone(&self.cooldowns),
            store: Arc::clone(&self.store),
            biome_end_timeout: self.settings.biome_end_timeout,
        };
        (id, tokio::spawn(verify.run(wait)))
    }
}

// ─── Verification task ──────────────────────────────────────────────

struct Verification<S> {
    id: JoinId,
    expected: String,
    detector: Weak<BiomeDetector<S>>,
    cooldowns: Arc<Mutex<JoinCooldowns>>,
    store: Arc<Mutex<JoinStore>>,
    biome_end_timeout: Duration,
}

impl<S: LogSource + 'static> Verification<S> {
    async fn run(self, wait: PendingWait<DetectionEvent>) -> Verdict {
        let started = Instant::now();
        match wait.await {
            Ok(Some(DetectionEvent::BiomeDetected { account, biome }))
                if biome.eq_ignore_ascii_case(&self.expected) =>
            {
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                info!(join_id = self.id, account = %account, biome = %biome, elapsed_ms, "join verified real");
                self.tag(JoinTag::BiomeVerifiedReal);
                self.watch_biome_end();
                Verdict::Real { biome, elapsed_ms }
            }
            Ok(Some(event)) => {
                let detected = match event {
                    DetectionEvent::BiomeDetected { biome, .. } => biome,
                    other => other.kind().to_string(),
                };
                warn!(
                    join_id = self.id,
                    expected = %self.expected,
                    detected = %detected,
                    "join was bait"
                );
                self.tag(JoinTag::BiomeVerifiedBait);
                lock(&self.cooldowns).clear_all();
                Verdict::Bait {
                    expected: self.expected,
                    detected,
                }
            }
            Ok(None) => {
                info!(join_id = self.id, expected = %self.expected, "no biome detected in time");
                self.tag(JoinTag::BiomeVerifiedTimeout);
                lock(&self.cooldowns).clear_all();
                Verdict::Timeout
            }
            Err(WaitError::Cancelled { scope }) => {
                warn!(join_id = self.id, scope = %scope, "verification cancelled");
                Verdict::Cancelled
            }
            Err(WaitError::Closed) => {
                warn!(join_id = self.id, "verification wait closed");
                Verdict::Cancelled
            }
        }
    }

    fn tag(&self, tag: JoinTag) {
        lock(&self.store).add_tags(self.id, &[tag]);
    }

    /// Clear cooldowns once the verified biome ends, or give up after the
    /// biome-end timeout.
    fn watch_biome_end(&self) {
        let Some(detector) = self.detector.upgrade() else {
            return;
        };
        let deadline = Instant::now() + self.biome_end_timeout;
        let wait = detector.wait_for(
            DetectionEventKind::BiomeChanged,
            self.biome_end_timeout,
            DETECTION_SCOPE,
        );
        drop(detector);

        let weak = self.detector.clone();
        let cooldowns = Arc::clone(&self.cooldowns);
        let expected = self.expected.clone();
        let id = self.id;
        tokio::spawn(async move {
            let mut wait = wait;
            loop {
                match wait.await {
                    // the change into the verified biome itself
                    Ok(Some(DetectionEvent::BiomeChanged { to: Some(to), .. }))
                        if to.eq_ignore_ascii_case(&expected) =>
                    {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        let Some(detector) = weak.upgrade() else {
                            return;
                        };
                        if remaining.is_zero() {
                            return;
                        }
                        wait = detector.wait_for(
                            DetectionEventKind::BiomeChanged,
                            remaining,
                            DETECTION_SCOPE,
                        );
                    }
                    Ok(Some(_)) => {
                        info!(join_id = id, biome = %expected, "biome ended; cooldowns cleared");
                        lock(&cooldowns).clear_all();
                        return;
                    }
                    Ok(None) => {
                        debug!(join_id = id, "biome end not seen before timeout");
                        return;
                    }
                    Err(e) => {
                        debug!(join_id = id, error = %e, "biome end watch stopped");
                        return;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::StaticLookup;
    use biome_radar_detector::DetectorConfig;
    use biome_radar_source_log::FsLogSource;
    use std::collections::BTreeMap;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::Path;

    fn settings() -> JoinSettings {
        JoinSettings::from_config(&Config::default())
    }

    fn trigger(name: &str, kind: TriggerKind, priority: u32) -> Trigger {
        Trigger {
            name: name.into(),
            kind,
            priority,
            cooldown_secs: 120,
            join_enabled: true,
        }
    }

    fn request(trigger: Trigger) -> JoinRequest {
        JoinRequest {
            details: NewJoin {
                title: trigger.name.clone(),
                ..NewJoin::default()
            },
            trigger,
            bypass_redundant: false,
        }
    }

    const JOINED: JoinOutcome = JoinOutcome {
        joined: true,
        link: LinkCheck::NotVerified,
    };

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("test");
        f.write_all(text.as_bytes()).expect("test");
    }

    fn rpc_line(ts: &str, biome: &str) -> String {
        format!(
            "{ts},5.0,ab,6 [FLog::Output] [BloxstrapRPC] {{\"command\":\"SetRichPresence\",\"data\":{{\"largeImage\":{{\"hoverText\":\"{biome}\"}}}}}}\n"
        )
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        log: std::path::PathBuf,
        pipeline: JoinPipeline<FsLogSource>,
    }

    async fn fixture(settings: JoinSettings) -> Fixture {
        let dir = tempfile::tempdir().expect("test");
        let log = dir.path().join("client.log");
        append(
            &log,
            "2026-03-01T09:59:00.000Z,0.1,ab,6 [FLog::GameJoinLoadTime] placeid:1, userid:1001, done\n",
        );
        let detector = Arc::new(BiomeDetector::new(
            FsLogSource::new(dir.path()),
            DetectorConfig::default(),
        ));
        let lookup = StaticLookup::new(BTreeMap::from([("alice".to_owned(), "1001".to_owned())]));
        detector.set_accounts(&lookup, &["alice".to_owned()]).await;
        Fixture {
            _dir: dir,
            log,
            pipeline: JoinPipeline::new(detector, JoinStore::new(), settings),
        }
    }

    fn tags(pipeline: &JoinPipeline<FsLogSource>, id: JoinId) -> Vec<JoinTag> {
        lock(pipeline.store()).get(id).expect("test").tags.clone()
    }

    #[test]
    fn bypass_words() {
        assert!(bypass_requested("GLITCHED just STARTED!"));
        assert!(bypass_requested("fresh server"));
        assert!(!bypass_requested("restarted"));
        assert!(!bypass_requested("glitched biome"));
    }

    #[test]
    fn weather_counts_as_biome_trigger() {
        assert!(TriggerKind::Weather.is_biome());
        assert!(!TriggerKind::Merchant.is_biome());
    }

    #[tokio::test]
    async fn admission_checks_switches_and_cooldowns() {
        let f = fixture(settings()).await;
        let now = Utc::now();
        let mut req = request(trigger("GLITCHED", TriggerKind::RareBiome, 5));

        req.trigger.join_enabled = false;
        assert_eq!(f.pipeline.admit(&req, now), Admission::Disabled);
        req.trigger.join_enabled = true;
        assert!(f.pipeline.admit(&req, now).is_allowed());

        lock(f.pipeline.cooldowns()).set_cooldown(5, 60, now);
        assert_eq!(
            f.pipeline.admit(&req, now),
            Admission::CoolingDown { priority: 5 }
        );
        let higher = request(trigger("CYBERSPACE", TriggerKind::RareBiome, 6));
        assert!(f.pipeline.admit(&higher, now).is_allowed());
    }

    #[tokio::test]
    async fn redundant_join_is_refused_unless_bypassed() {
        let f = fixture(settings()).await;
        append(&f.log, &rpc_line("2026-03-01T10:00:00.000Z", "Glitched"));
        f.pipeline.detector().run_cycle().await;

        let now = Utc::now();
        let mut req = request(trigger("GLITCHED", TriggerKind::RareBiome, 5));
        assert_eq!(
            f.pipeline.admit(&req, now),
            Admission::AlreadyInBiome {
                biome: "GLITCHED".into()
            }
        );

        req.bypass_redundant = true;
        assert!(f.pipeline.admit(&req, now).is_allowed());

        let merchant = request(trigger("Jester", TriggerKind::Merchant, 3));
        assert!(f.pipeline.admit(&merchant, now).is_allowed());
    }

    #[tokio::test]
    async fn matching_detection_is_real_and_biome_end_clears_cooldowns() {
        let f = fixture(settings()).await;
        let req = request(trigger("GLITCHED", TriggerKind::RareBiome, 5));
        let (id, verdict) = f.pipeline.record_join(&req, &JOINED, Utc::now());
        assert!(!lock(f.pipeline.cooldowns()).is_empty(), "join armed cooldown");

        append(&f.log, &rpc_line("2026-03-01T10:00:00.000Z", "glitched"));
        f.pipeline.detector().run_cycle().await;
        let verdict = verdict.await.expect("test");
        assert!(matches!(verdict, Verdict::Real { ref biome, .. } if biome == "glitched"));
        assert_eq!(
            tags(&f.pipeline, id),
            vec![JoinTag::LinkNotVerified, JoinTag::BiomeVerifiedReal]
        );
        assert!(!lock(f.pipeline.cooldowns()).is_empty());

        append(&f.log, &rpc_line("2026-03-01T10:05:00.000Z", "NORMAL"));
        f.pipeline.detector().run_cycle().await;
        for _ in 0..100 {
            if lock(f.pipeline.cooldowns()).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(lock(f.pipeline.cooldowns()).is_empty());
    }

    #[tokio::test]
    async fn other_biome_is_bait() {
        let f = fixture(settings()).await;
        let req = request(trigger("GLITCHED", TriggerKind::RareBiome, 5));
        let (id, verdict) = f.pipeline.record_join(&req, &JOINED, Utc::now());

        append(&f.log, &rpc_line("2026-03-01T10:00:00.000Z", "NORMAL"));
        f.pipeline.detector().run_cycle().await;
        assert_eq!(
            verdict.await.expect("test"),
            Verdict::Bait {
                expected: "GLITCHED".into(),
                detected: "NORMAL".into()
            }
        );
        assert!(tags(&f.pipeline, id).contains(&JoinTag::BiomeVerifiedBait));
        assert!(lock(f.pipeline.cooldowns()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out_and_clears_cooldowns() {
        let f = fixture(settings()).await;
        let req = request(trigger("GLITCHED", TriggerKind::RareBiome, 5));
        let (id, verdict) = f.pipeline.record_join(&req, &JOINED, Utc::now());

        assert_eq!(verdict.await.expect("test"), Verdict::Timeout);
        assert_eq!(primary(&f.pipeline, id), JoinTag::LinkNotVerified);
        assert!(tags(&f.pipeline, id).contains(&JoinTag::BiomeVerifiedTimeout));
        assert!(lock(f.pipeline.cooldowns()).is_empty());
    }

    fn primary(pipeline: &JoinPipeline<FsLogSource>, id: JoinId) -> JoinTag {
        lock(pipeline.store()).get(id).expect("test").primary_tag()
    }

    #[tokio::test]
    async fn newer_join_cancels_older_verification() {
        let f = fixture(settings()).await;
        let req = request(trigger("GLITCHED", TriggerKind::RareBiome, 5));
        let (_, first) = f.pipeline.record_join(&req, &JOINED, Utc::now());
        let (_, second) = f.pipeline.record_join(&req, &JOINED, Utc::now());

        assert_eq!(first.await.expect("test"), Verdict::Cancelled);
        f.pipeline.detector().clear_scope(DETECTION_SCOPE);
        assert_eq!(second.await.expect("test"), Verdict::Cancelled);
    }

    #[tokio::test]
    async fn bait_link_and_failed_join_skip_verification() {
        let f = fixture(settings()).await;
        let req = request(trigger("GLITCHED", TriggerKind::RareBiome, 5));

        let bait = JoinOutcome {
            joined: true,
            link: LinkCheck::Unsafe,
        };
        let (id, verdict) = f.pipeline.record_join(&req, &bait, Utc::now());
        assert_eq!(verdict.await.expect("test"), Verdict::Skipped);
        assert_eq!(tags(&f.pipeline, id), vec![JoinTag::LinkVerifiedUnsafe]);
        assert!(lock(f.pipeline.cooldowns()).is_empty(), "bait never arms");

        let failed = JoinOutcome {
            joined: false,
            link: LinkCheck::Safe,
        };
        let (id, verdict) = f.pipeline.record_join(&req, &failed, Utc::now());
        assert_eq!(verdict.await.expect("test"), Verdict::Skipped);
        assert_eq!(primary(&f.pipeline, id), JoinTag::LinkVerifiedSafe);
        assert!(tags(&f.pipeline, id).contains(&JoinTag::Failed));
    }

    #[tokio::test]
    async fn detection_off_is_not_verified() {
        let f = fixture(JoinSettings {
            detection_enabled: false,
            ..settings()
        })
        .await;
        let req = request(trigger("GLITCHED", TriggerKind::RareBiome, 5));
        let (id, verdict) = f.pipeline.record_join(&req, &JOINED, Utc::now());
        assert_eq!(verdict.await.expect("test"), Verdict::NotVerified);
        assert!(tags(&f.pipeline, id).contains(&JoinTag::BiomeNotVerified));
        assert_eq!(f.pipeline.detector().bus().pending_waits(DETECTION_SCOPE), 0);
    }
}
