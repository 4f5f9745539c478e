use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::cache::renewal::Renewal;
use crate::cache::status::SweepReport;
use crate::cache::token::Token;
use crate::cache::token_cache::TokenCache;
use crate::observability::metrics::get_metrics;

impl TokenCache {
    /// Start the repeating sweeper on its own task. It stops on `shutdown()`.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        let cache = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let interval = self.inner.settings.sweep_interval;

        tokio::spawn(async move {
            cache.inner.sweeper_running.store(true, Ordering::SeqCst);
            info!(interval_secs = interval.as_secs_f64(), "token sweeper started");

            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = cache.sweep().await;
                        if !report.refreshing.is_empty() || !report.evicted.is_empty() || !report.pruned_failures.is_empty() {
                            info!(refreshing = ?report.refreshing, evicted = ?report.evicted, pruned_failures = ?report.pruned_failures, "sweep finished");
                        }
                    }
                    // the watch::Ref must not outlive this arm, it is not Send
                    _ = async { let _ = shutdown_rx.wait_for(|stopped| *stopped).await; } => break,
                }
            }

            cache.inner.sweeper_running.store(false, Ordering::SeqCst);
            info!("token sweeper stopped");
        })
    }

    /// One sweeper pass.
    ///
    /// Stale entries get a background renewal each (the pass never waits for
    /// them). Entries hard-expired for longer than the grace period are evicted,
    /// and so are failure records of keys that have had no entry for that long.
    /// Failed renewals are logged by the renewal itself and retried next pass.
    pub async fn sweep(&self) -> SweepReport {
        get_metrics().await.sweeper_ticks.inc();
        *self.inner.last_sweep.write().await = Some(Instant::now());

        let now = Utc::now();
        let grace = self.inner.settings.eviction_grace;
        let snapshot: Vec<(String, Token)> = self
            .inner
            .entries
            .read()
            .await
            .iter()
            .map(|(key, token)| (key.to_owned(), token.clone()))
            .collect();

        let mut report = SweepReport::default();
        for (key, token) in snapshot {
            if token.expired_for(now).is_some_and(|past| past > grace) {
                if self.evict_expired(&key, now).await {
                    report.evicted.push(key);
                }
                continue;
            }

            if !token.needs_renewal_at(now, self.inner.coordinator.is_renewing(&key)) {
                continue;
            }
            // take the renewal slot here so a caller arriving right after the
            // tick joins this fetch instead of starting its own
            match self.inner.coordinator.acquire(&key) {
                Ok(Renewal::Leader(guard)) => {
                    debug!(key = %key, "background renewal started");
                    drop(self.spawn_renewal(guard));
                    report.refreshing.push(key);
                }
                Ok(Renewal::InProgress(_)) => {}
                Err(_) => break,
            }
        }

        report.pruned_failures = self.prune_failures().await;
        report.refreshing.sort();
        report.evicted.sort();
        report
    }
}
