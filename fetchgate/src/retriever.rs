//! Retrieval collaborator interface.
//!
//! The retrieval subsystem performs the actual network fetch. The engine
//! models it as an event stream: `start` hands back a channel of
//! [`RetrievalEvent`]s plus a cancellation token, and the fetch entry
//! consumes the stream, translating each event into a state-machine
//! transition. Exactly one terminal event (`Succeeded` or `Failed`) ends
//! the stream.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::key::ContentKey;
use crate::options::FetchOptions;
use crate::payload::Payload;

/// Block counters for a retrieval attempt.
///
/// `required` is the number of blocks that must succeed for the fetch to
/// complete; `total` includes redundancy. Until `finalized` is set, the
/// totals may still grow as the retrieval discovers more of the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockProgress {
    /// Total blocks known so far.
    pub total: u32,
    /// Blocks required to complete.
    pub required: u32,
    /// Blocks fetched successfully.
    pub succeeded: u32,
    /// Blocks that failed (retryable).
    pub failed: u32,
    /// Blocks that failed fatally.
    pub fatally_failed: u32,
    /// Whether the block set is final.
    pub finalized: bool,
}

impl BlockProgress {
    /// Blocks still needed: required minus everything already resolved.
    pub fn remaining_required(&self) -> u32 {
        self.required
            .saturating_sub(self.succeeded + self.failed + self.fatally_failed)
    }
}

/// One event from an in-flight retrieval.
#[derive(Debug, Clone)]
pub enum RetrievalEvent {
    /// Block counters changed.
    Progress(BlockProgress),
    /// The retrieval exhausted local sources and went to the network.
    SendingToNetwork,
    /// The content's MIME type became known before the data did.
    ExpectedMime(String),
    /// The content's size became known before the data did.
    ExpectedSize(u64),
    /// Terminal: the fetch completed with this payload.
    Succeeded {
        /// The fetched content.
        payload: Payload,
        /// MIME type of the content.
        mime: String,
    },
    /// Terminal: the fetch failed.
    Failed(FetchError),
}

/// A started retrieval: its event stream and cancellation handle.
pub struct Retrieval {
    /// Events emitted by the retrieval, ending with one terminal event.
    pub events: mpsc::Receiver<RetrievalEvent>,
    /// Cancelling this token asks the retrieval to stop. Best effort; the
    /// retrieval may still emit a terminal event that was already in
    /// flight.
    pub cancel: CancellationToken,
}

/// Starts asynchronous retrievals.
pub trait Retriever: Send + Sync {
    /// Begin retrieving `key` under `options`.
    ///
    /// Errors returned here become the fetch's terminal failure without a
    /// retrieval ever running.
    fn start(&self, key: &ContentKey, options: &FetchOptions) -> Result<Retrieval, FetchError>;
}
