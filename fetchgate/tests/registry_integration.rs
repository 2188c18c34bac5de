//! End-to-end behavior of the fetch registry over manual collaborators.

mod support;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use fetchgate::entry::FetchNotification;
use fetchgate::error::FetchError;
use fetchgate::key::ContentKey;
use fetchgate::options::{FetchOptions, RefilterPolicy};
use fetchgate::payload::Payload;
use fetchgate::registry::{FetchRegistry, RegistryConfig};
use fetchgate::retriever::{BlockProgress, RetrievalEvent, Retriever};
use fetchgate::store::{LocalStore, MemoryStore, StoredCopy};

use support::{CopyingFilter, ManualRetriever};

struct Harness {
    registry: FetchRegistry,
    retriever: Arc<ManualRetriever>,
    store: Arc<MemoryStore>,
}

fn harness(config: RegistryConfig) -> Harness {
    support::init_tracing();
    let retriever = ManualRetriever::new();
    let store = Arc::new(MemoryStore::new(64 * 1024 * 1024));
    let registry = FetchRegistry::new(
        Arc::clone(&store) as Arc<dyn LocalStore>,
        CopyingFilter::new(),
        Arc::clone(&retriever) as Arc<dyn Retriever>,
        config,
    );
    Harness {
        registry,
        retriever,
        store,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within one second");
}

fn progress(required: u32, succeeded: u32) -> RetrievalEvent {
    RetrievalEvent::Progress(BlockProgress {
        total: required,
        required,
        succeeded,
        failed: 0,
        fatally_failed: 0,
        finalized: true,
    })
}

#[tokio::test]
async fn test_concurrent_callers_share_one_retrieval() {
    let h = harness(RegistryConfig::default());
    let key = ContentKey::immutable("CHK@shared");

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let registry = h.registry.clone();
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            let jitter = rand::rng().random_range(0..10);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
            let entry = registry.join_or_create(&key, &FetchOptions::default());
            entry.waiter().join().await
        }));
    }

    let retriever = Arc::clone(&h.retriever);
    wait_until(move || retriever.starts() == 1).await;
    h.retriever
        .fetch(0)
        .succeed(Payload::new(b"content".to_vec()), "text/plain")
        .await;

    let mut payloads = Vec::new();
    for task in tasks {
        let snapshot = task.await.unwrap();
        payloads.push(snapshot.payload().unwrap().clone());
    }

    assert_eq!(h.retriever.starts(), 1);
    for payload in &payloads[1..] {
        assert!(payload.shares_storage(&payloads[0]));
    }
}

#[tokio::test]
async fn test_waiters_see_progress_then_shared_terminal_payload() {
    let h = harness(RegistryConfig::default());
    let key = ContentKey::immutable("CHK@blocks");

    let entry = h.registry.join_or_create(&key, &FetchOptions::default());
    let mut first = entry.waiter();
    let mut second = entry.waiter();

    let fetch = h.retriever.fetch(0);
    fetch.send(RetrievalEvent::SendingToNetwork).await;
    fetch.send(progress(3, 1)).await;
    fetch.send(progress(3, 2)).await;

    {
        let entry = Arc::clone(&entry);
        wait_until(move || entry.snapshot(false).progress().succeeded == 2).await;
    }
    let mid = entry.snapshot(false);
    assert!(mid.gone_to_network());
    assert!(!mid.finished());
    assert_eq!(mid.progress().required, 3);

    fetch
        .succeed(Payload::new(b"<html>done</html>".to_vec()), "text/html")
        .await;

    let (a, b) = tokio::join!(first.join(), second.join());
    assert!(a.finished() && b.finished());
    assert!(a.payload().unwrap().shares_storage(b.payload().unwrap()));
    assert_eq!(a.mime(), Some("text/html"));
    assert!(a.waited());
}

#[tokio::test]
async fn test_success_after_supersede_is_cancelled() {
    let h = harness(RegistryConfig::default());
    let key = ContentKey::versioned("USK@site", Some(4));

    let entry = h.registry.join_or_create(&key, &FetchOptions::default());
    let fetch = h.retriever.fetch(0);

    let marked = h.registry.supersede(&ContentKey::versioned("USK@site", Some(9)));
    assert_eq!(marked, 1);
    assert!(fetch.cancel.is_cancelled());
    assert_eq!(h.registry.len(), 0);

    // The retrieval had a success already in flight. It must be dropped,
    // not surfaced.
    fetch
        .succeed(Payload::new(b"stale edition".to_vec()), "text/html")
        .await;
    {
        let entry = Arc::clone(&entry);
        wait_until(move || entry.finished()).await;
    }

    let snapshot = entry.snapshot(true);
    assert!(snapshot.payload().is_none());
    assert_eq!(snapshot.failure(), Some(&FetchError::Cancelled));
}

#[tokio::test]
async fn test_accept_old_shortcut_skips_retrieval() {
    let h = harness(
        RegistryConfig::default().with_refilter_policy(RefilterPolicy::AcceptOld),
    );
    let key = ContentKey::immutable("CHK@kept");
    h.store.insert(
        &key,
        StoredCopy::filtered(Payload::new(b"<html>old</html>".to_vec()), "text/html"),
    );

    let entry = h.registry.join_or_create(&key, &FetchOptions::default());
    assert!(entry.finished());
    assert_eq!(h.retriever.starts(), 0);
    assert_eq!(h.registry.len(), 0);

    let snapshot = entry.snapshot(true);
    assert_eq!(snapshot.payload().unwrap().as_slice(), b"<html>old</html>");
    assert_eq!(snapshot.mime(), Some("text/html"));
}

#[tokio::test]
async fn test_stale_edition_request_goes_to_network() {
    let h = harness(RegistryConfig::default());
    let key = ContentKey::versioned("USK@site", Some(3));
    h.store.insert(
        &key,
        StoredCopy::unfiltered(Payload::new(b"edition three".to_vec()), "text/plain"),
    );
    h.store.record_edition(&key, 5);

    let entry = h.registry.join_or_create(&key, &FetchOptions::default());
    assert!(!entry.finished());
    assert_eq!(h.retriever.starts(), 1);
}

#[tokio::test]
async fn test_reload_within_grace_rejoins_the_same_fetch() {
    let h = harness(
        RegistryConfig::default().with_grace_period(Duration::from_millis(200)),
    );
    let key = ContentKey::immutable("CHK@reload");

    let entry = h.registry.join_or_create(&key, &FetchOptions::default());
    let first_snapshot = entry.snapshot(false);
    drop(first_snapshot);
    drop(entry);

    // Observer-free but inside the grace period: a sweep must not evict.
    assert_eq!(h.registry.sweep_once(), 0);

    let rejoined = h.registry.join_or_create(&key, &FetchOptions::default());
    assert_eq!(h.retriever.starts(), 1);
    assert_eq!(h.registry.stats().coalesced, 1);

    drop(rejoined);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(h.registry.sweep_once(), 1);
    assert!(h.retriever.fetch(0).cancel.is_cancelled());
}

#[tokio::test]
async fn test_listener_notification_sequence() {
    let h = harness(RegistryConfig::default());
    let key = ContentKey::immutable("CHK@watched");

    let entry = h.registry.join_or_create(&key, &FetchOptions::default());
    let mut listener = entry.listen();
    let fetch = h.retriever.fetch(0);

    fetch.send(RetrievalEvent::SendingToNetwork).await;
    assert_eq!(listener.recv().await, Some(FetchNotification::GoneToNetwork));

    fetch
        .send(RetrievalEvent::ExpectedMime("text/html".to_string()))
        .await;
    assert_eq!(listener.recv().await, Some(FetchNotification::Metadata));

    // 2000 remaining then 500 remaining: one threshold crossing.
    fetch.send(progress(2000, 0)).await;
    fetch.send(progress(2000, 1500)).await;
    assert_eq!(listener.recv().await, Some(FetchNotification::Progress));

    fetch
        .succeed(Payload::new(b"<html/>".to_vec()), "text/html")
        .await;
    assert_eq!(listener.recv().await, Some(FetchNotification::Finished));
}

#[tokio::test]
async fn test_sweeper_runs_alongside_live_fetches() {
    let h = harness(
        RegistryConfig::default()
            .with_grace_period(Duration::from_millis(50))
            .with_sweep_interval(Duration::from_millis(10)),
    );
    let shutdown = CancellationToken::new();
    let sweeper = h.registry.spawn_sweeper(shutdown.clone());

    let watched_key = ContentKey::immutable("CHK@watched");
    let watched = h.registry.join_or_create(&watched_key, &FetchOptions::default());
    let mut waiter = watched.waiter();

    let idle = h
        .registry
        .join_or_create(&ContentKey::immutable("CHK@idle"), &FetchOptions::default());
    drop(idle);

    // The idle entry ages out; the observed one survives.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.registry.len(), 1);

    let fetch = h.retriever.fetch(0);
    assert_eq!(fetch.key, watched_key);
    fetch
        .succeed(Payload::new(b"kept".to_vec()), "text/plain")
        .await;
    let snapshot = waiter.join().await;
    assert_eq!(snapshot.payload().unwrap().as_slice(), b"kept");

    shutdown.cancel();
    sweeper.await.unwrap();
}
