use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::renewal::{Renewal, RenewalCoordinator, RenewalGuard};
use crate::cache::status::{CacheStatistics, Health, TokenStatus};
use crate::cache::token::Token;
use crate::config::settings::SettingsConfig;
use crate::errors::{CacheError, CacheResult};
use crate::observability::metrics::{get_metrics, GaugeGuard};
use crate::sources::TokenFetcher;
use crate::utils::constants::{
    DEFAULT_EVICTION_GRACE_SECS, DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_UNHEALTHY_AFTER_FAILURES,
};

static EVICT_MANUAL: &str = "manual";
static EVICT_EXPIRED: &str = "expired";

/// Runtime knobs of the cache and its sweeper.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub sweep_interval: Duration,
    /// how long past hard expiry an entry survives before the sweeper drops it
    pub eviction_grace: Duration,
    /// consecutive failures on one key that turn `health()` unhealthy
    pub unhealthy_after_failures: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            eviction_grace: Duration::from_secs(DEFAULT_EVICTION_GRACE_SECS),
            unhealthy_after_failures: DEFAULT_UNHEALTHY_AFTER_FAILURES,
        }
    }
}

impl From<&SettingsConfig> for CacheSettings {
    fn from(settings: &SettingsConfig) -> Self {
        let defaults = CacheSettings::default();
        Self {
            sweep_interval: settings
                .sweep_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            eviction_grace: settings
                .eviction_grace_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.eviction_grace),
            unhealthy_after_failures: settings
                .unhealthy_after_failures
                .unwrap_or(defaults.unhealthy_after_failures),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct FailureRecord {
    consecutive: u32,
    last_error: Option<String>,
    last_failed_at: Option<Instant>,
}

pub(crate) struct CacheInner {
    pub(crate) entries: RwLock<HashMap<String, Token>>,
    failures: RwLock<HashMap<String, FailureRecord>>,
    pub(crate) coordinator: RenewalCoordinator,
    fetcher: Arc<dyn TokenFetcher>,
    pub(crate) settings: CacheSettings,
    pub(crate) last_sweep: RwLock<Option<Instant>>,
    pub(crate) sweeper_running: AtomicBool,
    pub(crate) shutdown_tx: watch::Sender<bool>,
}

/// Service key -> token cache with single-flight renewal.
///
/// Cloning is cheap and every clone shares the same entries.
#[derive(Clone)]
pub struct TokenCache {
    pub(crate) inner: Arc<CacheInner>,
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("settings", &self.inner.settings)
            .field("renewing", &self.inner.coordinator.renewing_keys())
            .finish()
    }
}

impl TokenCache {
    pub fn new(fetcher: Arc<dyn TokenFetcher>, settings: CacheSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                failures: RwLock::new(HashMap::new()),
                coordinator: RenewalCoordinator::new(),
                fetcher,
                settings,
                last_sweep: RwLock::new(None),
                sweeper_running: AtomicBool::new(false),
                shutdown_tx,
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    pub fn coordinator(&self) -> &RenewalCoordinator {
        &self.inner.coordinator
    }

    /// Cached token if still fresh, otherwise a renewed one.
    ///
    /// A failed renewal falls back to the previous token as long as it is not
    /// hard-expired.
    pub async fn get_token(&self, key: &str) -> CacheResult<Token> {
        self.validate_key(key)?;
        let metrics = get_metrics().await;

        if let Some(token) = self.fresh(key).await {
            debug!(key = %key, "token cache hit");
            metrics.cache_hits.with_label_values(&[key]).inc();
            return Ok(token);
        }
        metrics.cache_misses.with_label_values(&[key]).inc();

        match self.renew(key, false).await {
            Ok(token) => Ok(token),
            Err(CacheError::Shutdown) => Err(CacheError::Shutdown),
            Err(err) => self.serve_stale(key, err).await,
        }
    }

    pub async fn get_bearer_token(&self, key: &str) -> CacheResult<String> {
        self.get_token(key).await.map(|token| token.bearer_header_value())
    }

    /// Fetch regardless of the cached state. Joins a renewal already in flight.
    pub async fn refresh(&self, key: &str) -> CacheResult<Token> {
        self.validate_key(key)?;
        self.renew(key, true).await
    }

    /// Remove the entry for `key`, returning whether it existed.
    ///
    /// A fetch already in flight for the key still completes and repopulates
    /// the cache afterwards (last writer wins).
    pub async fn evict(&self, key: &str) -> bool {
        let removed = self.inner.entries.write().await.remove(key).is_some();
        self.inner.failures.write().await.remove(key);
        if removed {
            info!(key = %key, "token evicted");
            self.record_eviction(EVICT_MANUAL).await;
        }
        removed
    }

    /// Evict only if the entry is still past `eviction_grace` at `now`.
    pub(crate) async fn evict_expired(&self, key: &str, now: DateTime<Utc>) -> bool {
        let grace = self.inner.settings.eviction_grace;
        let removed = {
            let mut entries = self.inner.entries.write().await;
            let expired = entries
                .get(key)
                .and_then(|token| token.expired_for(now))
                .is_some_and(|past| past > grace);
            expired && entries.remove(key).is_some()
        };
        if removed {
            info!(key = %key, "expired token evicted");
            self.record_eviction(EVICT_EXPIRED).await;
        }
        removed
    }

    /// Drop failure records of keys without an entry whose last failure is
    /// older than `eviction_grace`. Returns the forgotten keys.
    pub(crate) async fn prune_failures(&self) -> Vec<String> {
        let grace = self.inner.settings.eviction_grace;
        let entries = self.inner.entries.read().await;
        let mut failures = self.inner.failures.write().await;
        let mut pruned: Vec<String> = failures
            .iter()
            .filter(|(key, failure)| {
                !entries.contains_key(*key)
                    && failure.last_failed_at.map_or(true, |at| at.elapsed() > grace)
            })
            .map(|(key, _)| key.to_owned())
            .collect();
        for key in &pruned {
            failures.remove(key);
        }
        pruned.sort();
        pruned
    }

    pub async fn status(&self, key: &str) -> TokenStatus {
        let token = self.inner.entries.read().await.get(key).cloned();
        let failure = self.inner.failures.read().await.get(key).cloned().unwrap_or_default();
        let is_renewing = self.inner.coordinator.is_renewing(key);
        build_status(key, token.as_ref(), is_renewing, failure)
    }

    pub async fn all_statuses(&self) -> BTreeMap<String, TokenStatus> {
        let entries = self.inner.entries.read().await.clone();
        let failures = self.inner.failures.read().await.clone();
        let renewing = self.inner.coordinator.renewing_keys();

        let mut statuses: BTreeMap<String, TokenStatus> = entries
            .iter()
            .map(|(key, token)| {
                let failure = failures.get(key).cloned().unwrap_or_default();
                let status = build_status(key, Some(token), renewing.contains(key), failure);
                (key.to_owned(), status)
            })
            .collect();

        // keys that never produced a token but keep failing are worth seeing too
        for (key, failure) in failures {
            if !statuses.contains_key(&key) {
                let status = build_status(&key, None, renewing.contains(&key), failure);
                statuses.insert(key, status);
            }
        }
        statuses
    }

    pub async fn statistics(&self) -> CacheStatistics {
        let now = Utc::now();
        let renewing = self.inner.coordinator.renewing_keys();
        let mut statistics = CacheStatistics::default();

        for (key, token) in self.inner.entries.read().await.iter() {
            statistics.total_tokens += 1;
            if token.is_expired_at(now) {
                statistics.expired_tokens += 1;
            } else {
                statistics.active_tokens += 1;
            }
            if renewing.contains(key) {
                statistics.renewing_tokens += 1;
            }
        }
        statistics.failing_keys = self
            .inner
            .failures
            .read()
            .await
            .values()
            .filter(|failure| failure.consecutive > 0)
            .count();
        statistics
    }

    /// Healthy while the sweeper ticks on schedule and no key keeps failing.
    pub async fn health(&self) -> Health {
        let sweeper_alive = self.sweeper_alive().await;
        let threshold = self.inner.settings.unhealthy_after_failures.max(1);
        let mut failing_keys: Vec<String> = self
            .inner
            .failures
            .read()
            .await
            .iter()
            .filter(|(_, failure)| failure.consecutive >= threshold)
            .map(|(key, _)| key.to_owned())
            .collect();
        failing_keys.sort();

        Health {
            healthy: sweeper_alive && failing_keys.is_empty(),
            sweeper_alive,
            failing_keys,
        }
    }

    async fn sweeper_alive(&self) -> bool {
        if !self.inner.sweeper_running.load(Ordering::SeqCst) {
            return false;
        }
        let max_silence = self.inner.settings.sweep_interval * 3;
        self.inner
            .last_sweep
            .read()
            .await
            .is_some_and(|last| last.elapsed() <= max_silence)
    }

    /// Stop the sweeper and release every caller still waiting on a renewal.
    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        self.inner.coordinator.shutdown();
        info!("token cache shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    // unknown keys must not leave failure records or metric labels behind
    fn validate_key(&self, key: &str) -> CacheResult<()> {
        if key.is_empty() {
            return Err(CacheError::configuration(key, "service key must not be empty"));
        }
        if !self.inner.fetcher.has_source(key) {
            debug!(key = %key, "no source for key");
            return Err(CacheError::not_found(key));
        }
        Ok(())
    }

    async fn fresh(&self, key: &str) -> Option<Token> {
        self.inner
            .entries
            .read()
            .await
            .get(key)
            .filter(|token| !token.is_cache_expired())
            .cloned()
    }

    async fn serve_stale(&self, key: &str, err: CacheError) -> CacheResult<Token> {
        let stale = self
            .inner
            .entries
            .read()
            .await
            .get(key)
            .filter(|token| !token.is_expired())
            .cloned();
        match stale {
            Some(token) => {
                warn!(key = %key, error = %err, expires_at = %token.expires_at, "renewal failed, serving stale token");
                get_metrics().await.stale_served.with_label_values(&[key]).inc();
                Ok(token)
            }
            None => Err(err),
        }
    }

    async fn renew(&self, key: &str, forced: bool) -> CacheResult<Token> {
        match self.inner.coordinator.acquire(key)? {
            Renewal::Leader(guard) => {
                // a previous leader may have finished between our lookup and acquire
                if !forced {
                    if let Some(token) = self.fresh(key).await {
                        guard.complete(Ok(token.clone()));
                        return Ok(token);
                    }
                }
                self.spawn_renewal(guard).await.unwrap_or_else(|err| {
                    Err(CacheError::fetch(key, format!("renewal task failed: {err}")))
                })
            }
            Renewal::InProgress(waiter) => waiter.wait().await,
        }
    }

    /// Run the fetch on its own task so it completes and updates the cache even
    /// if every caller stops waiting.
    pub(crate) fn spawn_renewal(&self, guard: RenewalGuard) -> JoinHandle<CacheResult<Token>> {
        let cache = self.clone();
        tokio::spawn(async move {
            let key = guard.key().to_owned();
            let _in_flight = GaugeGuard::track(&get_metrics().await.renewing_tokens);
            let outcome = cache.fetch_and_store(&key).await;
            guard.complete(outcome.clone());
            outcome
        })
    }

    async fn fetch_and_store(&self, key: &str) -> CacheResult<Token> {
        let metrics = get_metrics().await;
        let start = Instant::now();
        metrics.fetch_requests.with_label_values(&[key]).inc();

        let result = self.inner.fetcher.fetch(key).await;
        metrics.fetch_duration.with_label_values(&[key]).observe(start.elapsed().as_secs_f64());

        match result {
            Ok(token) => {
                self.store(key, token.clone()).await;
                self.inner.failures.write().await.remove(key);
                info!(key = %key, expires_at = %token.expires_at, cache_expires_at = %token.cache_expires_at, "token renewed");
                Ok(token)
            }
            Err(err @ CacheError::NotFound { .. }) => Err(err),
            Err(err) => {
                metrics.fetch_failures.with_label_values(&[key, err.reason()]).inc();
                let mut failures = self.inner.failures.write().await;
                let failure = failures.entry(key.to_owned()).or_default();
                failure.consecutive += 1;
                failure.last_error = Some(err.to_string());
                failure.last_failed_at = Some(Instant::now());
                warn!(key = %key, error = %err, consecutive_failures = failure.consecutive, "token fetch failed");
                Err(err)
            }
        }
    }

    /// Insert or replace the entry for `key`.
    pub(crate) async fn store(&self, key: &str, token: Token) {
        let total = {
            let mut entries = self.inner.entries.write().await;
            entries.insert(key.to_owned(), token);
            entries.len()
        };
        get_metrics().await.cached_tokens.set(total as i64);
    }

    async fn record_eviction(&self, reason: &str) {
        let total = self.inner.entries.read().await.len();
        let metrics = get_metrics().await;
        metrics.evictions.with_label_values(&[reason]).inc();
        metrics.cached_tokens.set(total as i64);
    }
}


fn build_status(key: &str, token: Option<&Token>, is_renewing: bool, failure: FailureRecord) -> TokenStatus {
    TokenStatus {
        key: key.to_owned(),
        exists: token.is_some(),
        seconds_until_expiry: token.map(Token::seconds_until_expiry),
        seconds_until_cache_expiry: token.map(Token::seconds_until_cache_expiry),
        expires_at: token.map(|token| token.expires_at),
        needs_renewal: token.is_some_and(|token| token.needs_renewal(is_renewing)),
        is_renewing,
        consecutive_failures: failure.consecutive,
        last_error: failure.last_error,
    }
}
