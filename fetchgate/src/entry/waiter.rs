//! Blocking join handles.

use std::sync::Arc;

use tokio::sync::watch;

use super::{FetchEntry, FetchSnapshot, Observer};

/// A join handle bound to one fetch entry.
///
/// `join` is the single asynchronous primitive; a caller that cannot wait
/// uses `poll` to get the latest snapshot immediately, terminal or not.
/// All waiters on one entry are released together at the terminal
/// transition. Dropping the waiter deregisters it from the entry.
pub struct FetchWaiter {
    entry: Arc<FetchEntry>,
    finished_rx: watch::Receiver<bool>,
}

impl FetchWaiter {
    pub(crate) fn new(entry: Arc<FetchEntry>, finished_rx: watch::Receiver<bool>) -> Self {
        Self { entry, finished_rx }
    }

    /// Wait until the entry reaches a terminal outcome, then snapshot it.
    ///
    /// Never holds the entry's lock while suspended. If the entry is
    /// already terminal this returns immediately.
    pub async fn join(&mut self) -> FetchSnapshot {
        let waited = !self.entry.finished();
        // The sender lives inside the entry we hold an Arc to, so this can
        // only fail if the entry is torn down mid-join; treat that as
        // terminal and fall through to the snapshot.
        let _ = self.finished_rx.wait_for(|finished| *finished).await;
        if waited {
            self.entry.set_has_waited();
        }
        self.entry
            .materialize(true, waited || self.entry.has_waited())
    }

    /// Snapshot the entry immediately, without waiting.
    pub fn poll(&self) -> FetchSnapshot {
        self.entry.snapshot(true)
    }

    /// The entry this waiter is bound to.
    pub fn entry(&self) -> &Arc<FetchEntry> {
        &self.entry
    }
}

impl Drop for FetchWaiter {
    fn drop(&mut self) {
        self.entry.release_observer(Observer::Waiter);
    }
}

impl std::fmt::Debug for FetchWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchWaiter")
            .field("key", self.entry.key())
            .finish()
    }
}
