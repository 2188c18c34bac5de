//! Local-store collaborator interface and in-memory reference store.
//!
//! The local store answers two questions for the cache shortcut: "do we
//! already hold a copy of this key?" and "what is the newest known-good
//! edition of this versioned key?". Lookups are synchronous and instant,
//! matching how the shortcut runs under the registry lock.
//!
//! `MemoryStore` is a size-bounded reference implementation backed by moka,
//! suitable for tests and for nodes that keep recent downloads in memory.

use dashmap::DashMap;
use moka::sync::Cache as MokaCache;

use crate::key::ContentKey;
use crate::payload::Payload;

/// A copy of previously downloaded content held by the local store.
#[derive(Debug, Clone)]
pub struct StoredCopy {
    /// The content bytes.
    pub payload: Payload,
    /// Recorded MIME type; may be empty if none was recorded.
    pub mime: String,
    /// Whether the copy already went through the content filter.
    pub already_filtered: bool,
}

impl StoredCopy {
    /// An unfiltered copy with the given MIME type.
    pub fn unfiltered(payload: Payload, mime: impl Into<String>) -> Self {
        Self {
            payload,
            mime: mime.into(),
            already_filtered: false,
        }
    }

    /// A copy that already went through the content filter.
    pub fn filtered(payload: Payload, mime: impl Into<String>) -> Self {
        Self {
            payload,
            mime: mime.into(),
            already_filtered: true,
        }
    }
}

/// Looks up already-downloaded copies and known-good editions.
pub trait LocalStore: Send + Sync {
    /// Look up a copy of the key's content.
    ///
    /// `prefer_unfiltered` hints which variant the caller would rather
    /// have when the store holds both; stores with a single copy per key
    /// return what they have.
    fn lookup(&self, key: &ContentKey, prefer_unfiltered: bool) -> Option<StoredCopy>;

    /// The newest edition of this versioned key that is known to exist.
    ///
    /// `None` for unversioned keys or when no edition has been observed.
    fn latest_known_edition(&self, key: &ContentKey) -> Option<u64>;
}

/// In-memory local store with weighted LRU eviction.
///
/// Copies are weighed by payload size so the store stays within its byte
/// budget; moka evicts cold entries automatically. Known-good editions are
/// tracked separately per routing string and only ever move forward.
pub struct MemoryStore {
    copies: MokaCache<String, StoredCopy>,
    editions: DashMap<String, u64>,
}

impl MemoryStore {
    /// Create a store bounded to `max_size_bytes` of payload data.
    pub fn new(max_size_bytes: u64) -> Self {
        let copies = MokaCache::builder()
            .weigher(|_key: &String, copy: &StoredCopy| {
                copy.payload.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .build();

        Self {
            copies,
            editions: DashMap::new(),
        }
    }

    /// Insert or replace the copy held for a key.
    pub fn insert(&self, key: &ContentKey, copy: StoredCopy) {
        self.copies.insert(Self::storage_key(key), copy);
        if let Some(edition) = key.edition() {
            self.record_edition(key, edition);
        }
    }

    /// Record that `edition` of this key is known to exist.
    ///
    /// Editions only move forward; recording an older edition is a no-op.
    pub fn record_edition(&self, key: &ContentKey, edition: u64) {
        self.editions
            .entry(key.routing().to_string())
            .and_modify(|current| {
                if edition > *current {
                    *current = edition;
                }
            })
            .or_insert(edition);
    }

    /// Number of copies currently held.
    pub fn len(&self) -> u64 {
        self.copies.run_pending_tasks();
        self.copies.entry_count()
    }

    /// Whether the store holds no copies.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn storage_key(key: &ContentKey) -> String {
        match key.edition() {
            Some(edition) => format!("{}/{}", key.routing(), edition),
            None => key.routing().to_string(),
        }
    }
}

impl LocalStore for MemoryStore {
    fn lookup(&self, key: &ContentKey, _prefer_unfiltered: bool) -> Option<StoredCopy> {
        self.copies.get(&Self::storage_key(key))
    }

    fn latest_known_edition(&self, key: &ContentKey) -> Option<u64> {
        self.editions.get(key.routing()).map(|entry| *entry.value())
    }
}
