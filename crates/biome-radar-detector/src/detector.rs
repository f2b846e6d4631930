//! Polling biome detector.
//!
//! Each cycle has two phases:
//! 1. discovery: rebind every account to its newest recent log file, emitting
//!    `LogFileChanged` for all bound accounts when the mapping moved;
//! 2. detection: scan each bound account's log tail and run its fresh signals
//!    through the transition table in [`AccountRuntimeState`].
//!
//! Blocking file IO runs on the blocking pool. The state lock is never held
//! across an await, and events are emitted only after it is released so
//! listeners may query the detector.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use biome_radar_core::defaults::{
    HEAD_WINDOW_BYTES, RECENT_LOG_WINDOW_SECS, STALE_THRESHOLD_MS, TAIL_WINDOW_BYTES,
    clamp_poll_interval_ms,
};
use biome_radar_core::{
    AccountBiome, AccountRuntimeState, DetectionEvent, DetectionEventKind, TrackedAccount,
};
use biome_radar_source_log::{LogSource, TailScan, discover_bindings, parse_tail};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, PendingWait};
use crate::resolver::{AccountLookup, AccountResolver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Bytes read from the end of a log per scan.
    pub tail_window_bytes: u64,
    /// Bytes read from the start of a log to find its account id.
    pub head_window_bytes: u64,
    /// Logs not modified within this window are ignored.
    pub recent_window: TimeDelta,
    /// A biome not confirmed within this long reads as unknown.
    pub stale_after: TimeDelta,
    /// Records are whole lines instead of marker..`}}}` spans.
    pub whole_line_records: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            tail_window_bytes: TAIL_WINDOW_BYTES,
            head_window_bytes: HEAD_WINDOW_BYTES,
            recent_window: TimeDelta::seconds(RECENT_LOG_WINDOW_SECS as i64),
            stale_after: TimeDelta::milliseconds(STALE_THRESHOLD_MS),
            whole_line_records: true,
        }
    }
}

/// What a call to [`BiomeDetector::run_cycle`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Ran {
        discovery: Duration,
        detection: Duration,
        events: usize,
    },
    /// Another cycle was still in flight.
    Skipped,
}

#[derive(Debug, Default)]
struct DetectorState {
    resolver: AccountResolver,
    bindings: BTreeMap<String, PathBuf>,
    runtime: HashMap<String, AccountRuntimeState>,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct BiomeDetector<S> {
    source: Arc<S>,
    config: DetectorConfig,
    bus: EventBus<DetectionEvent>,
    state: Mutex<DetectorState>,
    in_flight: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: LogSource + 'static> BiomeDetector<S> {
    pub fn new(source: S, config: DetectorConfig) -> Self {
        Self::with_bus(source, config, EventBus::new())
    }

    /// Detector publishing on an existing bus.
    pub fn with_bus(source: S, config: DetectorConfig, bus: EventBus<DetectionEvent>) -> Self {
        Self {
            source: Arc::new(source),
            config,
            bus,
            state: Mutex::new(DetectorState::default()),
            in_flight: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, DetectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus<DetectionEvent> {
        &self.bus
    }

    /// Replace the tracked account list with the resolution of `names`.
    ///
    /// Runtime state survives only for account ids that remain tracked.
    pub async fn set_accounts<L: AccountLookup>(&self, lookup: &L, names: &[String]) -> usize {
        let mut resolver = AccountResolver::new();
        let tracked = resolver.resolve(lookup, names).await;

        let mut st = self.lock_state();
        st.runtime.retain(|id, _| resolver.is_tracked(id));
        st.resolver = resolver;
        info!(requested = names.len(), tracked, "tracked accounts updated");
        tracked
    }

    /// Start polling every `interval` (at least the minimum poll interval).
    ///
    /// The first cycle runs immediately. Returns `false` when already running
    /// or when called outside a Tokio runtime.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("detector already running");
            return false;
        }

        let handle = match Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!("detector start requested outside a tokio runtime");
                return false;
            }
        };

        let requested_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        let period = Duration::from_millis(clamp_poll_interval_ms(requested_ms));
        let weak = Arc::downgrade(self);
        *task = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(detector) = weak.upgrade() else {
                    break;
                };
                detector.run_cycle().await;
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "detector started");
        true
    }

    /// Stop polling. State is kept. Returns whether the detector was running.
    pub fn stop(&self) -> bool {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(h) => {
                let was_running = !h.is_finished();
                h.abort();
                info!("detector stopped");
                was_running
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one discovery + detection cycle as of `now`.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleOutcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("previous detection cycle still running; skipped");
            return CycleOutcome::Skipped;
        };
        let started = Instant::now();

        // Phase 1: discovery
        let source = Arc::clone(&self.source);
        let (recent, head) = (self.config.recent_window, self.config.head_window_bytes);
        let discovered =
            match tokio::task::spawn_blocking(move || discover_bindings(&*source, now, recent, head))
                .await
            {
                Ok(b) => Some(b),
                Err(e) => {
                    warn!(error = %e, "log discovery task failed; keeping previous bindings");
                    None
                }
            };

        let mut events = Vec::new();
        let targets: Vec<(String, String, PathBuf)> = {
            let mut st = self.lock_state();
            if let Some(bindings) = discovered {
                if bindings != st.bindings {
                    for (id, path) in &bindings {
                        if let Some(name) = st.resolver.display_name(id) {
                            events.push(DetectionEvent::LogFileChanged {
                                account: name.to_owned(),
                                log_path: path.clone(),
                            });
                        }
                    }
                    debug!(bound = bindings.len(), "log bindings changed");
                    st.bindings = bindings;
                }
            }
            st.resolver
                .accounts()
                .iter()
                .filter_map(|a| {
                    st.bindings
                        .get(&a.account_id)
                        .map(|p| (a.account_id.clone(), a.display_name.clone(), p.clone()))
                })
                .collect()
        };
        self.publish(&events);
        let discovery = started.elapsed();
        let mut emitted = events.len();

        // Phase 2: detection
        let detect_started = Instant::now();
        if !targets.is_empty() {
            let source = Arc::clone(&self.source);
            let (window, whole_line) = (
                self.config.tail_window_bytes,
                self.config.whole_line_records,
            );
            let scanned = tokio::task::spawn_blocking(move || {
                targets
                    .into_iter()
                    .map(|(id, name, path)| {
                        let scan = parse_tail(&*source, &path, window, whole_line);
                        (id, name, scan)
                    })
                    .collect::<Vec<_>>()
            })
            .await;

            match scanned {
                Ok(scans) => {
                    let events = self.apply_scans(scans, now);
                    self.publish(&events);
                    emitted += events.len();
                }
                Err(e) => warn!(error = %e, "log scan task failed"),
            }
        }
        let detection = detect_started.elapsed();

        debug!(
            discovery_ms = discovery.as_millis() as u64,
            detection_ms = detection.as_millis() as u64,
            total_ms = started.elapsed().as_millis() as u64,
            events = emitted,
            "detection cycle finished"
        );
        CycleOutcome::Ran {
            discovery,
            detection,
            events: emitted,
        }
    }

    fn apply_scans(
        &self,
        scans: Vec<(String, String, TailScan)>,
        now: DateTime<Utc>,
    ) -> Vec<DetectionEvent> {
        let mut st = self.lock_state();
        let mut events = Vec::new();
        for (id, name, scan) in scans {
            // accounts may have been replaced while the scan ran
            if !st.resolver.is_tracked(&id) {
                continue;
            }
            let state = st.runtime.entry(id).or_default();
            let signals = scan.signals();
            if scan.effectively_disconnected {
                events.extend(state.apply_disconnected_batch(&name, &signals, now));
            } else {
                events.extend(state.apply_batch(&name, &signals, now));
            }
        }
        events
    }

    fn publish(&self, events: &[DetectionEvent]) {
        for event in events {
            match event {
                DetectionEvent::BiomeChanged { account, from, to } => {
                    info!(account = %account, from = ?from, to = ?to, "biome changed");
                }
                DetectionEvent::ClientDisconnected { account } => {
                    info!(account = %account, "client disconnected");
                }
                DetectionEvent::LogFileChanged { account, log_path } => {
                    info!(account = %account, path = %log_path.display(), "log file bound");
                }
                DetectionEvent::BiomeDetected { account, biome } => {
                    debug!(account = %account, biome = %biome, "biome detected");
                }
            }
            self.bus.emit(event);
        }
    }

    /// Biome of `account_id`, or `None` if unknown or not confirmed within
    /// `stale_after`.
    pub fn current_biome(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
        stale_after: TimeDelta,
    ) -> Option<String> {
        self.lock_state()
            .runtime
            .get(account_id)
            .and_then(|s| s.current_biome(now, stale_after))
            .map(str::to_owned)
    }

    /// Staleness-aware biome of every tracked account, in tracked order.
    pub fn current_biomes(&self, now: DateTime<Utc>) -> Vec<AccountBiome> {
        let st = self.lock_state();
        st.resolver
            .accounts()
            .iter()
            .map(|a| AccountBiome {
                display_name: a.display_name.clone(),
                biome: st
                    .runtime
                    .get(&a.account_id)
                    .and_then(|s| s.current_biome(now, self.config.stale_after))
                    .map(str::to_owned),
            })
            .collect()
    }

    /// Whether the account named `display_name` is currently in `biome`.
    /// Both comparisons ignore ASCII case.
    pub fn is_account_in_biome(&self, display_name: &str, biome: &str, now: DateTime<Utc>) -> bool {
        self.current_biomes(now).iter().any(|ab| {
            ab.display_name.eq_ignore_ascii_case(display_name)
                && ab.biome.as_deref().is_some_and(|b| b.eq_ignore_ascii_case(biome))
        })
    }

    pub fn is_any_account_in_biome(&self, biome: &str, now: DateTime<Utc>) -> bool {
        self.current_biomes(now)
            .iter()
            .any(|ab| ab.biome.as_deref().is_some_and(|b| b.eq_ignore_ascii_case(biome)))
    }

    pub fn log_bindings(&self) -> BTreeMap<String, PathBuf> {
        self.lock_state().bindings.clone()
    }

    pub fn tracked_accounts(&self) -> Vec<TrackedAccount> {
        self.lock_state().resolver.accounts().to_vec()
    }

    pub fn account_state(&self, account_id: &str) -> Option<AccountRuntimeState> {
        self.lock_state().runtime.get(account_id).cloned()
    }

    pub fn wait_for(
        &self,
        kind: DetectionEventKind,
        timeout: Duration,
        scope: impl Into<String>,
    ) -> PendingWait<DetectionEvent> {
        self.bus.wait_for(kind, timeout, scope)
    }

    pub fn clear_scope(&self, scope: &str) -> usize {
        self.bus.clear_scope(scope)
    }
}

impl<S> Drop for BiomeDetector<S> {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = task {
            handle.abort();
        }
    }
}
