//! Fetch registry: single-flight coordination across callers.
//!
//! The registry owns every live [`FetchEntry`] and guarantees that at most
//! one retrieval is in flight per (key, size cap, options class) identity.
//! Callers go through [`FetchRegistry::join_or_create`]; a second caller
//! for the same identity joins the in-flight entry instead of starting a
//! duplicate retrieval.
//!
//! # Architecture
//!
//! ```text
//! callers ──► FetchRegistry ──► FetchEntry ◄── retrieval event pump
//!                  │                │
//!                  │   eviction hints (unbounded mpsc)
//!                  ▼                │
//!              sweeper ◄────────────┘
//! ```
//!
//! # Locking
//!
//! The registry mutex is always taken before any entry mutex and never
//! held across an await. Entry teardown runs strictly after the entry has
//! been removed from the map, outside the registry lock.

mod sweep;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::entry::{FetchEntry, ShortcutOutcome};
use crate::error::FetchError;
use crate::filter::ContentFilter;
use crate::key::ContentKey;
use crate::options::{FetchOptions, RefilterPolicy};
use crate::retriever::{RetrievalEvent, Retriever};
use crate::store::LocalStore;

/// Default idle grace period before an unobserved entry is evicted.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Default interval between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Identity under which fetches coalesce.
///
/// Two requests share an entry iff their keys match and their options are
/// coalesce-equivalent; the fields here are exactly the options that
/// participate in equivalence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    key: ContentKey,
    max_size: u64,
    filter_data: bool,
    mime_override: Option<String>,
    charset_override: Option<String>,
}

impl EntryKey {
    pub(crate) fn new(key: &ContentKey, options: &FetchOptions) -> Self {
        Self {
            key: key.clone(),
            max_size: options.max_size,
            filter_data: options.filter_data,
            mime_override: options.mime_override.clone(),
            charset_override: options.charset_override.clone(),
        }
    }

    pub(crate) fn key(&self) -> &ContentKey {
        &self.key
    }
}

/// Tuning knobs for a [`FetchRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long an entry with no observers survives before eviction.
    pub grace_period: Duration,
    /// How often the background sweeper runs.
    pub sweep_interval: Duration,
    /// What to do with previously filtered cached copies.
    pub refilter_policy: RefilterPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            refilter_policy: RefilterPolicy::default(),
        }
    }
}

impl RegistryConfig {
    /// Set the idle grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Set the refilter policy.
    pub fn with_refilter_policy(mut self, refilter_policy: RefilterPolicy) -> Self {
        self.refilter_policy = refilter_policy;
        self
    }
}

/// Counters describing registry activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Total `join_or_create` calls.
    pub joins: u64,
    /// Calls that joined an already-live entry.
    pub coalesced: u64,
    /// Entries created.
    pub created: u64,
    /// Entries resolved from the local store without a retrieval.
    pub shortcut_hits: u64,
    /// Entries evicted by the sweeper.
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    joins: AtomicU64,
    coalesced: AtomicU64,
    created: AtomicU64,
    shortcut_hits: AtomicU64,
    evicted: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> RegistryStats {
        RegistryStats {
            joins: self.joins.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            shortcut_hits: self.shortcut_hits.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

struct RegistryInner {
    entries: Mutex<HashMap<EntryKey, Arc<FetchEntry>>>,
    store: Arc<dyn LocalStore>,
    filter: Arc<dyn ContentFilter>,
    retriever: Arc<dyn Retriever>,
    config: RegistryConfig,
    evict_tx: mpsc::UnboundedSender<EntryKey>,
    /// Taken by the background sweeper; drained inline until then.
    evict_rx: Mutex<Option<mpsc::UnboundedReceiver<EntryKey>>>,
    stats: StatsCounters,
}

/// Handle to the single-flight fetch coordinator. Cheap to clone.
#[derive(Clone)]
pub struct FetchRegistry {
    inner: Arc<RegistryInner>,
}

impl FetchRegistry {
    /// Create a registry over the given collaborators.
    pub fn new(
        store: Arc<dyn LocalStore>,
        filter: Arc<dyn ContentFilter>,
        retriever: Arc<dyn Retriever>,
        config: RegistryConfig,
    ) -> Self {
        let (evict_tx, evict_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(HashMap::new()),
                store,
                filter,
                retriever,
                config,
                evict_tx,
                evict_rx: Mutex::new(Some(evict_rx)),
                stats: StatsCounters::default(),
            }),
        }
    }

    /// Join the in-flight fetch for this identity, or create one.
    ///
    /// On a miss the local store is consulted first; only if the store
    /// cannot resolve the request does a retrieval start. A direct reuse of
    /// an externally shared stored buffer returns a terminal entry that was
    /// never made joinable, so no later caller can observe that buffer.
    ///
    /// Must run inside a tokio runtime: a created entry spawns its event
    /// pump.
    pub fn join_or_create(&self, key: &ContentKey, options: &FetchOptions) -> Arc<FetchEntry> {
        self.inner.stats.joins.fetch_add(1, Ordering::Relaxed);
        let entry_key = EntryKey::new(key, options);

        let (entry, needs_retrieval) = {
            let mut entries = self.inner.entries.lock();
            if let Some(existing) = entries.get(&entry_key) {
                existing.touch();
                self.inner.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "joined in-flight fetch");
                return Arc::clone(existing);
            }

            self.inner.stats.created.fetch_add(1, Ordering::Relaxed);
            let entry = FetchEntry::new(
                key.clone(),
                options.clone(),
                entry_key.clone(),
                self.inner.evict_tx.clone(),
            );

            match entry.attempt_cache_shortcut(
                self.inner.store.as_ref(),
                self.inner.filter.as_ref(),
                self.inner.config.refilter_policy,
            ) {
                ShortcutOutcome::Resolved { remove_now: true } => {
                    // Never inserted: the stored buffer must not outlive
                    // this caller's view of it through the registry.
                    self.inner.stats.shortcut_hits.fetch_add(1, Ordering::Relaxed);
                    return entry;
                }
                ShortcutOutcome::Resolved { remove_now: false } => {
                    self.inner.stats.shortcut_hits.fetch_add(1, Ordering::Relaxed);
                    entries.insert(entry_key, Arc::clone(&entry));
                    (entry, false)
                }
                ShortcutOutcome::NotResolved => {
                    entries.insert(entry_key, Arc::clone(&entry));
                    (entry, true)
                }
            }
        };

        if needs_retrieval {
            self.start_retrieval(Arc::clone(&entry));
        }
        entry
    }

    /// Cancel fetches made stale by a newer edition of `key`.
    ///
    /// Entries with the same routing whose requested edition is absent or
    /// strictly older than `key`'s are marked for immediate eviction, then
    /// a sweep runs. Returns how many entries were marked.
    pub fn supersede(&self, key: &ContentKey) -> usize {
        let Some(new_edition) = key.edition() else {
            return 0;
        };

        let stale: Vec<Arc<FetchEntry>> = {
            let entries = self.inner.entries.lock();
            entries
                .values()
                .filter(|entry| {
                    entry.key().routing() == key.routing()
                        && entry.key().is_versioned()
                        && entry.key().edition().map_or(true, |e| e < new_edition)
                })
                .cloned()
                .collect()
        };

        for entry in &stale {
            debug!(key = %entry.key(), new_edition, "superseded by newer edition");
            entry.request_immediate_cancel();
        }
        if !stale.is_empty() {
            self.sweep_once();
        }
        stale.len()
    }

    /// Remove a specific entry if it is still the registered one.
    ///
    /// A no-op when the slot has since been taken by a different entry for
    /// the same identity.
    pub fn remove(&self, entry: &Arc<FetchEntry>) {
        let removed = {
            let mut entries = self.inner.entries.lock();
            match entries.get(entry.entry_key()) {
                Some(current) if Arc::ptr_eq(current, entry) => {
                    entries.remove(entry.entry_key())
                }
                _ => None,
            }
        };
        if let Some(removed) = removed {
            removed.teardown();
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether no entries are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Activity counters.
    pub fn stats(&self) -> RegistryStats {
        self.inner.stats.snapshot()
    }

    /// The configuration this registry runs with.
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    fn start_retrieval(&self, entry: Arc<FetchEntry>) {
        match self.inner.retriever.start(entry.key(), entry.options()) {
            Ok(retrieval) => {
                entry.set_retrieval_cancel(retrieval.cancel);
                tokio::spawn(pump_events(entry, retrieval.events));
            }
            Err(error) => {
                warn!(key = %entry.key(), error = %error, "retrieval failed to start");
                entry.on_failure(error);
            }
        }
    }
}

impl std::fmt::Debug for FetchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchRegistry")
            .field("entries", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Forward retrieval events into the entry until the stream ends.
async fn pump_events(
    entry: Arc<FetchEntry>,
    mut events: mpsc::Receiver<RetrievalEvent>,
) {
    while let Some(event) = events.recv().await {
        entry.on_event(event);
    }
    if !entry.finished() {
        // The retrieval dropped its sender without a terminal event,
        // typically after cancellation.
        entry.on_failure(FetchError::Cancelled);
    }
}
