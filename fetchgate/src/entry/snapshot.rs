//! Immutable point-in-time views of a fetch entry.

use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;
use crate::payload::Payload;
use crate::retriever::BlockProgress;

use super::{FetchEntry, Observer};

/// Immutable view of a fetch entry's progress or outcome.
///
/// A snapshot either carries the shared payload handle (terminal success,
/// taken with `payload_wanted`) or progress counters plus an optional
/// failure. Snapshots count as live observers of their entry; dropping the
/// snapshot deregisters it, and the last observer to go schedules an
/// eviction check.
pub struct FetchSnapshot {
    entry: Arc<FetchEntry>,
    payload: Option<Payload>,
    mime: Option<String>,
    size: Option<u64>,
    progress: BlockProgress,
    gone_to_network: bool,
    failure: Option<FetchError>,
    finished: bool,
    eta: Option<Duration>,
    sequence: u64,
    waited: bool,
}

impl FetchSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        entry: Arc<FetchEntry>,
        payload: Option<Payload>,
        mime: Option<String>,
        size: Option<u64>,
        progress: BlockProgress,
        gone_to_network: bool,
        failure: Option<FetchError>,
        finished: bool,
        eta: Option<Duration>,
        sequence: u64,
        waited: bool,
    ) -> Self {
        Self {
            entry,
            payload,
            mime,
            size,
            progress,
            gone_to_network,
            failure,
            finished,
            eta,
            sequence,
            waited,
        }
    }

    /// The payload, if the fetch succeeded and the payload was requested.
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// The MIME type, once known.
    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// The content size, once known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Block counters at snapshot time.
    pub fn progress(&self) -> BlockProgress {
        self.progress
    }

    /// Whether the retrieval had gone to the network.
    pub fn gone_to_network(&self) -> bool {
        self.gone_to_network
    }

    /// The terminal failure, if any.
    pub fn failure(&self) -> Option<&FetchError> {
        self.failure.as_ref()
    }

    /// Whether the terminal failure is fatal.
    pub fn failed_fatally(&self) -> bool {
        self.failure.as_ref().is_some_and(FetchError::is_fatal)
    }

    /// Whether the entry had reached a terminal outcome.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Estimated time to completion, when meaningful.
    pub fn eta(&self) -> Option<Duration> {
        self.eta
    }

    /// How many terminal snapshots of this entry existed before this one.
    ///
    /// Presentation layers use this to tell a first report from repeat
    /// polling without flapping.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether the caller that took this snapshot has waited on the entry.
    pub fn waited(&self) -> bool {
        self.waited
    }

    /// The entry this snapshot was taken from.
    pub fn entry(&self) -> &Arc<FetchEntry> {
        &self.entry
    }

    /// Release this snapshot, deregistering it from the entry.
    ///
    /// Equivalent to dropping; provided for call sites that want the
    /// release to be visible in the code.
    pub fn release(self) {}
}

impl Drop for FetchSnapshot {
    fn drop(&mut self) {
        self.entry.release_observer(Observer::Snapshot);
    }
}

impl std::fmt::Debug for FetchSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchSnapshot")
            .field("finished", &self.finished)
            .field("has_payload", &self.payload.is_some())
            .field("failure", &self.failure)
            .field("progress", &self.progress)
            .field("sequence", &self.sequence)
            .finish()
    }
}
