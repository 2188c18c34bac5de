//! Single-flight fetch entry.
//!
//! A `FetchEntry` coordinates one retrieval for one (key, size cap,
//! options class) identity. It is the event sink for the retrieval
//! collaborator, the source of [`FetchSnapshot`]s, and the thing
//! [`FetchWaiter`]s and [`FetchListener`]s are bound to. Entries are
//! created and owned by the [`FetchRegistry`](crate::registry::FetchRegistry);
//! callers only ever hold them behind an `Arc`.
//!
//! # State machine
//!
//! ```text
//! Created ──► CacheHit-Terminal
//!    │
//!    └──► Fetching ──► [GoneToNetwork] ──► Terminal(Success | Failure)
//! ```
//!
//! `Terminal` is absorbing: the terminal outcome is set exactly once and
//! every later event is ignored.
//!
//! # Locking
//!
//! All mutable state sits behind one `parking_lot::Mutex`, which is always
//! taken *after* the registry lock and never held across an await or while
//! notifying observers.

mod listener;
mod shortcut;
mod snapshot;
mod waiter;

pub use listener::{FetchListener, FetchNotification};
pub use snapshot::FetchSnapshot;
pub use waiter::FetchWaiter;

pub(crate) use shortcut::ShortcutOutcome;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;
use crate::key::ContentKey;
use crate::options::FetchOptions;
use crate::payload::Payload;
use crate::registry::EntryKey;
use crate::retriever::{BlockProgress, RetrievalEvent};

/// Listeners are only notified when the number of blocks still needed drops
/// across this boundary, so huge fetches do not wake observers on every
/// block.
pub(crate) const PROGRESS_NOTIFY_THRESHOLD: u32 = 1024;

/// Minimum number of blocks fetched since going to the network before an
/// ETA is considered meaningful.
pub(crate) const ETA_MIN_SAMPLES: u32 = 5;

/// Capacity of the listener broadcast channel. Listeners that fall further
/// behind than this skip ahead rather than blocking the entry.
const LISTENER_CHANNEL_CAPACITY: usize = 64;

/// Which kind of observer is being deregistered.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Observer {
    Waiter,
    Snapshot,
    Listener,
}

#[derive(Debug)]
struct EntryState {
    progress: BlockProgress,
    /// Blocks already fetched when the retrieval went to the network.
    pre_network_succeeded: u32,
    gone_to_network: bool,
    mime: Option<String>,
    size: Option<u64>,
    payload: Option<Payload>,
    failure: Option<FetchError>,
    finished: bool,
    /// Set by teardown; a success arriving after this drops its payload.
    cancelled: bool,
    /// Skip the idle grace period when evicting.
    immediate_cancel: bool,
    retrieval_cancel: Option<CancellationToken>,
    waiters: usize,
    snapshots: usize,
    listeners: usize,
    has_waited: bool,
    /// Times this entry was materialized into a terminal snapshot.
    sequence: u64,
    last_touched: Instant,
}

/// Single-flight coordinator for one fetch identity.
pub struct FetchEntry {
    key: ContentKey,
    options: FetchOptions,
    entry_key: EntryKey,
    started_at: Instant,
    state: Mutex<EntryState>,
    finished_tx: watch::Sender<bool>,
    notify_tx: broadcast::Sender<FetchNotification>,
    evict_tx: mpsc::UnboundedSender<EntryKey>,
}

impl FetchEntry {
    pub(crate) fn new(
        key: ContentKey,
        options: FetchOptions,
        entry_key: EntryKey,
        evict_tx: mpsc::UnboundedSender<EntryKey>,
    ) -> Arc<Self> {
        let (finished_tx, _) = watch::channel(false);
        let (notify_tx, _) = broadcast::channel(LISTENER_CHANNEL_CAPACITY);
        let now = Instant::now();

        Arc::new(Self {
            key,
            options,
            entry_key,
            started_at: now,
            state: Mutex::new(EntryState {
                progress: BlockProgress::default(),
                pre_network_succeeded: 0,
                gone_to_network: false,
                mime: None,
                size: None,
                payload: None,
                failure: None,
                finished: false,
                cancelled: false,
                immediate_cancel: false,
                retrieval_cancel: None,
                waiters: 0,
                snapshots: 0,
                listeners: 0,
                has_waited: false,
                sequence: 0,
                last_touched: now,
            }),
            finished_tx,
            notify_tx,
            evict_tx,
        })
    }

    /// The key this entry is fetching.
    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    /// The options this entry was created with.
    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// When this entry was created.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub(crate) fn entry_key(&self) -> &EntryKey {
        &self.entry_key
    }

    /// Whether the entry reached a terminal outcome.
    pub fn finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Whether the terminal outcome is a stored payload.
    pub fn has_payload(&self) -> bool {
        self.state.lock().payload.is_some()
    }

    /// Register a waiter bound to this entry.
    pub fn waiter(self: &Arc<Self>) -> FetchWaiter {
        {
            let mut state = self.state.lock();
            state.last_touched = Instant::now();
            state.waiters += 1;
        }
        FetchWaiter::new(Arc::clone(self), self.finished_tx.subscribe())
    }

    /// Register a listener bound to this entry.
    ///
    /// Listeners are woken on notified transitions only, not on every
    /// counter tick; see [`PROGRESS_NOTIFY_THRESHOLD`].
    pub fn listen(self: &Arc<Self>) -> FetchListener {
        {
            let mut state = self.state.lock();
            state.last_touched = Instant::now();
            state.listeners += 1;
        }
        FetchListener::new(Arc::clone(self), self.notify_tx.subscribe())
    }

    /// Take an immutable snapshot of the current state.
    ///
    /// With `payload_wanted` false the snapshot is a progress-only view
    /// and never carries the payload, even once terminal.
    pub fn snapshot(self: &Arc<Self>, payload_wanted: bool) -> FetchSnapshot {
        let waited = self.state.lock().has_waited;
        self.materialize(payload_wanted, waited)
    }

    /// Build a snapshot, registering it as a live observer.
    pub(crate) fn materialize(
        self: &Arc<Self>,
        payload_wanted: bool,
        waited: bool,
    ) -> FetchSnapshot {
        let mut state = self.state.lock();
        state.last_touched = Instant::now();
        state.snapshots += 1;

        let terminal = state.payload.is_some() || state.failure.is_some();
        let sequence = state.sequence;
        if terminal {
            state.sequence += 1;
        }

        let payload = if payload_wanted {
            state.payload.clone()
        } else {
            None
        };

        FetchSnapshot::new(
            Arc::clone(self),
            payload,
            state.mime.clone(),
            state.size,
            state.progress,
            state.gone_to_network,
            state.failure.clone(),
            state.finished,
            Self::eta_locked(&state, self.started_at),
            sequence,
            waited,
        )
    }

    /// Estimated time until completion.
    ///
    /// `None` until the retrieval has gone to the network and at least
    /// [`ETA_MIN_SAMPLES`] blocks have succeeded since then; after that,
    /// the remaining required blocks at the observed completion rate.
    pub fn eta(&self) -> Option<Duration> {
        Self::eta_locked(&self.state.lock(), self.started_at)
    }

    fn eta_locked(state: &EntryState, started_at: Instant) -> Option<Duration> {
        if !state.gone_to_network {
            return None;
        }
        let required = state.progress.required;
        let done = state.progress.succeeded;
        if required == 0 || done >= required {
            return None;
        }
        let samples = done.saturating_sub(state.pre_network_succeeded);
        if samples < ETA_MIN_SAMPLES {
            return None;
        }
        let elapsed = started_at.elapsed();
        Some(elapsed * (required - done) / samples)
    }

    /// Mark this entry as tearable-down without waiting out the grace
    /// period. Used when a strictly newer edition supersedes the fetch.
    pub fn request_immediate_cancel(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.immediate_cancel = true;
            state.waiters == 0 && state.snapshots == 0 && state.listeners == 0
        };
        if idle {
            let _ = self.evict_tx.send(self.entry_key.clone());
        }
    }

    pub(crate) fn set_retrieval_cancel(&self, token: CancellationToken) {
        self.state.lock().retrieval_cancel = Some(token);
    }

    pub(crate) fn set_has_waited(&self) {
        self.state.lock().has_waited = true;
    }

    pub(crate) fn has_waited(&self) -> bool {
        self.state.lock().has_waited
    }

    pub(crate) fn touch(&self) {
        self.state.lock().last_touched = Instant::now();
    }

    /// Translate one retrieval event into a state transition, notifying
    /// listeners only when a meaningful threshold is crossed.
    pub(crate) fn on_event(&self, event: RetrievalEvent) {
        let note = match event {
            RetrievalEvent::Progress(progress) => {
                let mut state = self.state.lock();
                if state.finished {
                    None
                } else {
                    let old_remaining = state.progress.remaining_required();
                    state.progress = progress;
                    let new_remaining = state.progress.remaining_required();
                    let crossed = old_remaining > PROGRESS_NOTIFY_THRESHOLD
                        && new_remaining <= PROGRESS_NOTIFY_THRESHOLD;
                    crossed.then_some(FetchNotification::Progress)
                }
            }
            RetrievalEvent::SendingToNetwork => {
                let mut state = self.state.lock();
                if state.finished || state.gone_to_network {
                    None
                } else {
                    state.gone_to_network = true;
                    state.pre_network_succeeded = state.progress.succeeded;
                    Some(FetchNotification::GoneToNetwork)
                }
            }
            RetrievalEvent::ExpectedMime(mime) => {
                let mut state = self.state.lock();
                if state.finished {
                    None
                } else {
                    state.mime = Some(mime);
                    state.gone_to_network.then_some(FetchNotification::Metadata)
                }
            }
            RetrievalEvent::ExpectedSize(size) => {
                let mut state = self.state.lock();
                if state.finished {
                    None
                } else {
                    state.size = Some(size);
                    state.gone_to_network.then_some(FetchNotification::Metadata)
                }
            }
            RetrievalEvent::Succeeded { payload, mime } => {
                self.on_success(payload, mime);
                return;
            }
            RetrievalEvent::Failed(error) => {
                self.on_failure(error);
                return;
            }
        };

        if let Some(note) = note {
            let _ = self.notify_tx.send(note);
        }
    }

    /// Terminal success. If cancellation already happened the payload is
    /// dropped instead of stored, and observers see a cancelled outcome.
    pub(crate) fn on_success(&self, payload: Payload, mime: String) {
        let dropped;
        {
            let mut state = self.state.lock();
            if state.finished {
                // Late duplicate terminal; the payload drops here without
                // ever being stored.
                return;
            }
            state.size = Some(payload.len() as u64);
            state.mime = Some(mime);
            if state.cancelled {
                state.failure = Some(FetchError::Cancelled);
                dropped = Some(payload);
            } else {
                state.payload = Some(payload);
                dropped = None;
            }
            state.finished = true;
        }
        if dropped.is_some() {
            debug!(key = %self.key, "dropping payload that arrived after cancel");
        }
        drop(dropped);
        self.finish_notify();
    }

    /// Terminal failure.
    pub(crate) fn on_failure(&self, error: FetchError) {
        {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            debug!(key = %self.key, error = %error, "fetch failed");
            state.failure = Some(error);
            state.finished = true;
        }
        self.finish_notify();
    }

    fn finish_notify(&self) {
        let _ = self.finished_tx.send(true);
        let _ = self.notify_tx.send(FetchNotification::Finished);
    }

    /// Pure eviction check: no observers left, and either idle past the
    /// grace period or marked for immediate cancel.
    pub(crate) fn can_evict(&self, grace_period: Duration) -> bool {
        let state = self.state.lock();
        if state.waiters != 0 || state.snapshots != 0 || state.listeners != 0 {
            return false;
        }
        state.immediate_cancel || state.last_touched.elapsed() >= grace_period
    }

    /// Side-effecting half of eviction: cancel the retrieval (best effort)
    /// and release any owned payload. Must run outside the registry lock;
    /// the entry must already have been removed from the registry so it
    /// cannot be joined again.
    pub(crate) fn teardown(&self) {
        let (token, payload) = {
            let mut state = self.state.lock();
            state.cancelled = true;
            (state.retrieval_cancel.take(), state.payload.take())
        };
        if let Some(token) = token {
            debug!(key = %self.key, "cancelling retrieval");
            token.cancel();
        }
        // Last owned handle; the storage frees here unless snapshots still
        // share it.
        drop(payload);
    }

    pub(crate) fn release_observer(&self, observer: Observer) {
        let idle = {
            let mut state = self.state.lock();
            let count = match observer {
                Observer::Waiter => &mut state.waiters,
                Observer::Snapshot => &mut state.snapshots,
                Observer::Listener => &mut state.listeners,
            };
            *count = count.saturating_sub(1);
            state.waiters == 0 && state.snapshots == 0 && state.listeners == 0
        };
        if idle {
            let _ = self.evict_tx.send(self.entry_key.clone());
        }
    }
}

impl std::fmt::Debug for FetchEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FetchEntry")
            .field("key", &self.key)
            .field("finished", &state.finished)
            .field("gone_to_network", &state.gone_to_network)
            .field("waiters", &state.waiters)
            .field("snapshots", &state.snapshots)
            .field("listeners", &state.listeners)
            .finish()
    }
}
