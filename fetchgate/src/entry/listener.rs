//! Push-notification handles.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::{FetchEntry, Observer};

/// A notified transition on a fetch entry.
///
/// These are the only transitions listeners wake on; minor counter ticks
/// are deliberately silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchNotification {
    /// The retrieval exhausted local sources and went to the network.
    GoneToNetwork,
    /// The blocks-still-needed figure dropped across the notify threshold.
    Progress,
    /// MIME type or size arrived after the retrieval was on the network.
    Metadata,
    /// The entry reached its terminal outcome.
    Finished,
}

/// A push-notification handle bound to one fetch entry.
///
/// Intended for many concurrent passive observers that should not each
/// hold a suspended join. A listener that falls behind the notification
/// stream skips ahead rather than erroring. Dropping the listener
/// deregisters it from the entry.
pub struct FetchListener {
    entry: Arc<FetchEntry>,
    rx: broadcast::Receiver<FetchNotification>,
}

impl FetchListener {
    pub(crate) fn new(entry: Arc<FetchEntry>, rx: broadcast::Receiver<FetchNotification>) -> Self {
        Self { entry, rx }
    }

    /// The next notified transition, or `None` once the entry is gone and
    /// no further notifications can arrive.
    pub async fn recv(&mut self) -> Option<FetchNotification> {
        loop {
            match self.rx.recv().await {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, key = %self.entry.key(), "listener lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The entry this listener is bound to.
    pub fn entry(&self) -> &Arc<FetchEntry> {
        &self.entry
    }
}

impl Drop for FetchListener {
    fn drop(&mut self) {
        self.entry.release_observer(Observer::Listener);
    }
}

impl std::fmt::Debug for FetchListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchListener")
            .field("key", self.entry.key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ContentKey;
    use crate::options::FetchOptions;
    use crate::payload::Payload;
    use crate::registry::EntryKey;
    use tokio::sync::mpsc;

    fn test_entry() -> Arc<FetchEntry> {
        let key = ContentKey::immutable("CHK@listen");
        let options = FetchOptions::default();
        let entry_key = EntryKey::new(&key, &options);
        let (evict_tx, _evict_rx) = mpsc::unbounded_channel();
        FetchEntry::new(key, options, entry_key, evict_tx)
    }

    #[tokio::test]
    async fn test_listener_sees_terminal() {
        let entry = test_entry();
        let mut listener = entry.listen();

        entry.on_success(Payload::new(vec![1u8]), "text/plain".to_string());
        assert_eq!(listener.recv().await, Some(FetchNotification::Finished));
    }

    #[tokio::test]
    async fn test_multiple_listeners_all_notified() {
        let entry = test_entry();
        let mut first = entry.listen();
        let mut second = entry.listen();

        entry.on_success(Payload::new(vec![1u8]), "text/plain".to_string());
        assert_eq!(first.recv().await, Some(FetchNotification::Finished));
        assert_eq!(second.recv().await, Some(FetchNotification::Finished));
    }
}
