//! Cache shortcut: resolving a fetch from already-downloaded local data.
//!
//! Runs synchronously at entry creation, before any retrieval starts and
//! while the registry lock is still held. A shortcut that reuses a stored
//! buffer which cannot safely be re-shared reports `remove_now`, and the
//! registry never makes the entry visible to other callers.

use tracing::debug;

use crate::error::FetchError;
use crate::filter::{ContentFilter, FilterError, MimeClass};
use crate::mime;
use crate::options::RefilterPolicy;
use crate::store::{LocalStore, StoredCopy};

use super::FetchEntry;

/// What the shortcut decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShortcutOutcome {
    /// The entry reached a terminal outcome without a retrieval.
    ///
    /// `remove_now` means the payload was an externally shared stored
    /// buffer: the entry must be deregistered synchronously so no later
    /// caller can join it and observe a buffer the store may reclaim.
    Resolved { remove_now: bool },
    /// Local data could not resolve the request; start a retrieval.
    NotResolved,
}

impl FetchEntry {
    /// Try to resolve this fetch from the local store.
    pub(crate) fn attempt_cache_shortcut(
        &self,
        store: &dyn LocalStore,
        filter: &dyn ContentFilter,
        policy: RefilterPolicy,
    ) -> ShortcutOutcome {
        if self.edition_requires_network(store) {
            return ShortcutOutcome::NotResolved;
        }

        let Some(copy) = store.lookup(self.key(), !self.options().filter_data) else {
            return ShortcutOutcome::NotResolved;
        };

        if !self.options().filter_data && !copy.already_filtered {
            // Direct reuse of the stored buffer, MIME override applied.
            let mime = self
                .options()
                .mime_override
                .clone()
                .unwrap_or_else(|| mime::effective(&copy.mime).to_string());
            debug!(key = %self.key(), "serving unfiltered cached copy");
            self.on_success(copy.payload, mime);
            return ShortcutOutcome::Resolved { remove_now: true };
        }

        if copy.already_filtered {
            if policy == RefilterPolicy::RefetchAlways || !self.options().filter_data {
                return ShortcutOutcome::NotResolved;
            }
            if !self.accepts_cached_filtered(&copy.mime) {
                return ShortcutOutcome::NotResolved;
            }
            if policy == RefilterPolicy::AcceptOld {
                debug!(key = %self.key(), "serving previously filtered cached copy");
                let mime = mime::effective(&copy.mime).to_string();
                self.on_success(copy.payload, mime);
                return ShortcutOutcome::Resolved { remove_now: true };
            }
            // Refilter: fall through and run the filter again.
        }

        self.refilter_copy(copy, filter)
    }

    /// Whether cached data cannot be trusted for this key's edition.
    ///
    /// A versioned key with no requested edition always needs the network
    /// (the caller wants whatever is newest). A requested edition that is
    /// strictly older than the newest known-good edition also does.
    fn edition_requires_network(&self, store: &dyn LocalStore) -> bool {
        if !self.key().is_versioned() {
            return false;
        }
        let Some(requested) = self.key().edition() else {
            return true;
        };
        match store.latest_known_edition(self.key()) {
            Some(known_good) => known_good > requested,
            None => false,
        }
    }

    /// Whether a previously filtered copy is compatible with this entry's
    /// charset and MIME overrides.
    fn accepts_cached_filtered(&self, copy_mime: &str) -> bool {
        if self.options().charset_override.is_some() {
            return false;
        }
        match &self.options().mime_override {
            None => true,
            Some(requested) => {
                copy_mime == requested || mime::strip_params(copy_mime) == requested
            }
        }
    }

    /// Run the content filter over a stored copy.
    fn refilter_copy(&self, copy: StoredCopy, filter: &dyn ContentFilter) -> ShortcutOutcome {
        let mut full_mime = mime::effective(&copy.mime).to_string();
        if let Some(requested) = &self.options().mime_override {
            if !copy.already_filtered {
                full_mime = requested.clone();
            } else if full_mime != *requested {
                // An already-filtered copy was produced under a different
                // type; overriding it now would serve mislabelled bytes.
                return ShortcutOutcome::NotResolved;
            }
        }
        let stripped = mime::strip_params(&full_mime).to_string();

        match filter.classify(&stripped) {
            MimeClass::Unknown => {
                // The stored payload drops here with the copy.
                self.on_failure(FetchError::UnknownMime(stripped));
                ShortcutOutcome::Resolved { remove_now: false }
            }
            MimeClass::Safe => {
                debug!(key = %self.key(), mime = %stripped, "cached copy safe without filtering");
                self.on_success(copy.payload, stripped);
                ShortcutOutcome::Resolved { remove_now: true }
            }
            MimeClass::Filterable => {
                match filter.filter(&copy.payload, &full_mime, self.key()) {
                    Ok(filtered) => {
                        // The filter wrote into a fresh buffer that nothing
                        // else references, so the entry can stay registered
                        // and serve later callers.
                        self.on_success(filtered, full_mime);
                        ShortcutOutcome::Resolved { remove_now: false }
                    }
                    Err(FilterError::Unsafe(reason)) => {
                        self.on_failure(FetchError::UnsafeContent(reason));
                        ShortcutOutcome::Resolved { remove_now: false }
                    }
                    Err(FilterError::Io(error)) => {
                        debug!(
                            key = %self.key(),
                            error = %error,
                            "filtering cached copy failed, falling back to retrieval"
                        );
                        ShortcutOutcome::NotResolved
                    }
                }
            }
        }
    }
}
