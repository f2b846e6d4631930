//! Synchronous, kind-keyed event bus with scoped waits.
//!
//! Listeners run on the emitting thread, in subscription order, after the
//! registry lock has been released, so a listener may subscribe, unsubscribe
//! or emit again. A panicking listener is logged and skipped.
//!
//! Waits ([`EventBus::wait_for`]) are one-shot and grouped under a scope tag;
//! [`EventBus::clear_scope`] cancels every pending wait of a scope at once.
//! Timeouts need a Tokio runtime.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use biome_radar_core::{DetectionEvent, DetectionEventKind};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

/// An event that can travel on an [`EventBus`].
pub trait BusEvent: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

impl BusEvent for DetectionEvent {
    type Kind = DetectionEventKind;

    fn kind(&self) -> DetectionEventKind {
        DetectionEvent::kind(self)
    }
}

/// Why a wait ended without an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("wait cancelled: scope {scope:?} was cleared")]
    Cancelled { scope: String },

    #[error("event bus dropped before the wait resolved")]
    Closed,
}

/// Outcome of a wait: `Ok(None)` is a timeout.
pub type WaitResult<E> = Result<Option<E>, WaitError>;

/// Handle returned by [`EventBus::on`] and [`EventBus::once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Entry<E> {
    id: ListenerId,
    once: bool,
    listener: Listener<E>,
    timer: Option<AbortHandle>,
}

struct WaitSlot<E: BusEvent> {
    id: u64,
    kind: E::Kind,
    scope: String,
    tx: oneshot::Sender<WaitResult<E>>,
    timer: Option<AbortHandle>,
}

impl<E: BusEvent> WaitSlot<E> {
    fn resolve(self, result: WaitResult<E>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // receiver may already be gone
        let _ = self.tx.send(result);
    }
}

struct Registry<E: BusEvent> {
    next_id: u64,
    listeners: HashMap<E::Kind, Vec<Entry<E>>>,
    /// Pending waits in registration order.
    waits: Vec<WaitSlot<E>>,
}

impl<E: BusEvent> Registry<E> {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove_listener(&mut self, id: ListenerId) -> bool {
        for entries in self.listeners.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                let entry = entries.remove(pos);
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                return true;
            }
        }
        false
    }

    fn take_waits(&mut self, pred: impl Fn(&WaitSlot<E>) -> bool) -> Vec<WaitSlot<E>> {
        let (taken, kept) = std::mem::take(&mut self.waits)
            .into_iter()
            .partition(|slot| pred(slot));
        self.waits = kept;
        taken
    }
}

/// Cloneable handle to a shared listener registry.
pub struct EventBus<E: BusEvent> {
    inner: Arc<Mutex<Registry<E>>>,
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reg = self.lock();
        f.debug_struct("EventBus")
            .field("listeners", &reg.listeners.values().map(Vec::len).sum::<usize>())
            .field("waits", &reg.waits.len())
            .finish()
    }
}

impl<E: BusEvent> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: HashMap::new(),
                waits: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn weak(&self) -> Weak<Mutex<Registry<E>>> {
        Arc::downgrade(&self.inner)
    }

    /// Subscribe `listener` to every event of `kind`.
    pub fn on<F>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(kind, Arc::new(listener), false, None)
    }

    /// Subscribe for the first event of `kind` only.
    ///
    /// With a `timeout`, the listener is dropped uninvoked once it elapses.
    pub fn once<F>(&self, kind: E::Kind, listener: F, timeout: Option<Duration>) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(kind, Arc::new(listener), true, timeout)
    }

    fn subscribe(
        &self,
        kind: E::Kind,
        listener: Listener<E>,
        once: bool,
        timeout: Option<Duration>,
    ) -> ListenerId {
        let mut reg = self.lock();
        let id = ListenerId(reg.next_id());
        let timer = timeout.and_then(|after| {
            let weak = self.weak();
            spawn_timer(after, move || {
                if let Some(inner) = weak.upgrade() {
                    let mut reg = inner.lock().unwrap_or_else(PoisonError::into_inner);
                    if reg.remove_listener(id) {
                        debug!(kind = ?kind, "once listener timed out");
                    }
                }
            })
        });
        reg.listeners.entry(kind).or_default().push(Entry {
            id,
            once,
            listener,
            timer,
        });
        id
    }

    /// Unsubscribe. Returns whether the listener was still registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.lock().remove_listener(id)
    }

    /// Deliver `event` to its kind's listeners and pending waits.
    ///
    /// Returns whether anything was subscribed.
    pub fn emit(&self, event: &E) -> bool {
        let kind = event.kind();
        let (listeners, waits) = {
            let mut reg = self.lock();
            let mut listeners = Vec::new();
            if let Some(entries) = reg.listeners.get_mut(&kind) {
                listeners.extend(entries.iter().map(|e| Arc::clone(&e.listener)));
                entries.retain(|e| {
                    if !e.once {
                        return true;
                    }
                    if let Some(timer) = &e.timer {
                        timer.abort();
                    }
                    false
                });
                if entries.is_empty() {
                    reg.listeners.remove(&kind);
                }
            }
            let waits = reg.take_waits(|slot| slot.kind == kind);
            (listeners, waits)
        };

        let delivered = !listeners.is_empty() || !waits.is_empty();
        for slot in waits {
            slot.resolve(Ok(Some(event.clone())));
        }
        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                error!(kind = ?kind, panic = %panic_message(&*panic), "event listener panicked");
            }
        }
        delivered
    }

    /// Resolve with the next event of `kind`, or `Ok(None)` after `timeout`.
    ///
    /// The wait is registered before this returns, so an event emitted before
    /// the future is first polled is not missed.
    pub fn wait_for(
        &self,
        kind: E::Kind,
        timeout: Duration,
        scope: impl Into<String>,
    ) -> PendingWait<E> {
        let scope = scope.into();
        let (tx, rx) = oneshot::channel();

        let mut reg = self.lock();
        let id = reg.next_id();
        let weak = self.weak();
        let timer = spawn_timer(timeout, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let slot = {
                let mut reg = inner.lock().unwrap_or_else(PoisonError::into_inner);
                reg.take_waits(|slot| slot.id == id).pop()
            };
            if let Some(mut slot) = slot {
                debug!(kind = ?slot.kind, scope = %slot.scope, "wait timed out");
                slot.timer = None;
                slot.resolve(Ok(None));
            }
        });
        debug!(kind = ?kind, scope = %scope, ?timeout, "wait registered");
        reg.waits.push(WaitSlot {
            id,
            kind,
            scope,
            tx,
            timer,
        });

        PendingWait { rx }
    }

    /// Cancel every pending wait registered under `scope`, oldest first.
    ///
    /// Returns the number of waits cancelled.
    pub fn clear_scope(&self, scope: &str) -> usize {
        let cancelled = self.lock().take_waits(|slot| slot.scope == scope);
        let count = cancelled.len();
        for slot in cancelled {
            let scope = slot.scope.clone();
            slot.resolve(Err(WaitError::Cancelled { scope }));
        }
        if count > 0 {
            debug!(scope, count, "scope cleared");
        }
        count
    }

    /// Drop every listener and cancel every pending wait.
    pub fn remove_all_listeners(&self) {
        let (entries, waits) = {
            let mut reg = self.lock();
            let entries: Vec<Entry<E>> = reg.listeners.drain().flat_map(|(_, v)| v).collect();
            (entries, std::mem::take(&mut reg.waits))
        };
        for entry in entries {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
        for slot in waits {
            let scope = slot.scope.clone();
            slot.resolve(Err(WaitError::Cancelled { scope }));
        }
    }

    /// Number of listeners currently subscribed to `kind`.
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Number of unresolved waits under `scope`.
    pub fn pending_waits(&self, scope: &str) -> usize {
        self.lock().waits.iter().filter(|s| s.scope == scope).count()
    }
}

/// Future returned by [`EventBus::wait_for`].
#[must_use = "a wait does nothing unless awaited"]
#[derive(Debug)]
pub struct PendingWait<E> {
    rx: oneshot::Receiver<WaitResult<E>>,
}

impl<E> Future for PendingWait<E> {
    type Output = WaitResult<E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(WaitError::Closed)))
    }
}

fn spawn_timer<F>(after: Duration, on_fire: F) -> Option<AbortHandle>
where
    F: FnOnce() + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            let task = handle.spawn(async move {
                tokio::time::sleep(after).await;
                on_fire();
            });
            Some(task.abort_handle())
        }
        Err(_) => {
            warn!(?after, "no tokio runtime; bus timeout not armed");
            None
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
