//! Shared doubles for integration tests.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fetchgate::error::FetchError;
use fetchgate::filter::{ContentFilter, FilterError, MimeClass};
use fetchgate::key::ContentKey;
use fetchgate::options::FetchOptions;
use fetchgate::payload::Payload;
use fetchgate::retriever::{Retrieval, RetrievalEvent, Retriever};

/// Route tracing output through the test harness. Idempotent.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Handle to one fetch a [`ManualRetriever`] started.
#[derive(Clone)]
pub struct StartedFetch {
    pub key: ContentKey,
    pub events: mpsc::Sender<RetrievalEvent>,
    pub cancel: CancellationToken,
}

impl StartedFetch {
    pub async fn send(&self, event: RetrievalEvent) {
        self.events
            .send(event)
            .await
            .expect("event pump dropped its receiver");
    }

    pub async fn succeed(&self, payload: Payload, mime: &str) {
        self.send(RetrievalEvent::Succeeded {
            payload,
            mime: mime.to_string(),
        })
        .await;
    }
}

/// A retriever whose fetches are driven by hand from the test body.
#[derive(Default)]
pub struct ManualRetriever {
    started: Mutex<Vec<StartedFetch>>,
}

impl ManualRetriever {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn starts(&self) -> usize {
        self.started.lock().len()
    }

    pub fn fetch(&self, index: usize) -> StartedFetch {
        self.started.lock()[index].clone()
    }
}

impl Retriever for ManualRetriever {
    fn start(&self, key: &ContentKey, _options: &FetchOptions) -> Result<Retrieval, FetchError> {
        let (tx, events) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        self.started.lock().push(StartedFetch {
            key: key.clone(),
            events: tx,
            cancel: cancel.clone(),
        });
        Ok(Retrieval { events, cancel })
    }
}

/// A filter that copies every payload into fresh storage and treats every
/// MIME type as filterable.
#[derive(Default)]
pub struct CopyingFilter;

impl CopyingFilter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl ContentFilter for CopyingFilter {
    fn classify(&self, _mime: &str) -> MimeClass {
        MimeClass::Filterable
    }

    fn filter(
        &self,
        payload: &Payload,
        _mime: &str,
        _base: &ContentKey,
    ) -> Result<Payload, FilterError> {
        Ok(Payload::new(payload.as_slice().to_vec()))
    }
}
