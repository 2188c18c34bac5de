//! Background eviction of idle entries.
//!
//! Eviction is two-phase. Phase one, under the registry lock, asks each
//! entry the pure question "can you be evicted?" and removes the ones that
//! say yes. Phase two, after the lock is released, runs each removed
//! entry's teardown: cancelling its retrieval and releasing its payload.
//! Keeping the side effects out of the lock means a slow cancellation never
//! stalls callers joining unrelated fetches.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::FetchRegistry;

impl FetchRegistry {
    /// Run one eviction pass. Returns how many entries were evicted.
    pub fn sweep_once(&self) -> usize {
        // Drain pending hints if the sweeper has not claimed the channel.
        // Hints only say "worth checking now"; the scan below is what
        // decides.
        if let Some(rx) = self.inner.evict_rx.lock().as_mut() {
            while rx.try_recv().is_ok() {}
        }

        let grace = self.inner.config.grace_period;
        let evicted = {
            let mut entries = self.inner.entries.lock();
            let keys: Vec<_> = entries
                .iter()
                .filter(|(_, entry)| entry.can_evict(grace))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| entries.remove(&key))
                .collect::<Vec<_>>()
        };

        for entry in &evicted {
            debug!(key = %entry.key(), "evicting idle fetch");
            entry.teardown();
        }

        let count = evicted.len();
        if count > 0 {
            self.inner
                .stats
                .evicted
                .fetch_add(count as u64, std::sync::atomic::Ordering::Relaxed);
        } else {
            trace!("sweep found nothing to evict");
        }
        count
    }

    /// Spawn the background sweeper task.
    ///
    /// Sweeps on every [`RegistryConfig`](super::RegistryConfig) interval
    /// tick and additionally whenever an entry hints that it just lost its
    /// last observer. Cancelling `shutdown` stops the task after the
    /// current pass.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        let mut hints = self.inner.evict_rx.lock().take();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.inner.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                let hint = async {
                    match hints.as_mut() {
                        Some(rx) => rx.recv().await,
                        // A second sweeper runs on ticks alone.
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep_once();
                    }
                    hinted = hint => {
                        if hinted.is_some() {
                            registry.sweep_once();
                        } else {
                            hints = None;
                        }
                    }
                }
            }
            debug!("sweeper stopped");
        })
    }
}
