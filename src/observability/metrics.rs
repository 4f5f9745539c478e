use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use tracing::info;
use std::sync::Arc;
use tokio::sync::OnceCell;

// Declare the static OnceCell to hold the Metrics.
static METRICS_INSTANCE: OnceCell<Arc<Metrics>> = OnceCell::const_new();

/// Asynchronously initializes and gets a reference to the static `Metrics`.
pub async fn get_metrics() -> &'static Arc<Metrics> {
    METRICS_INSTANCE.get_or_init(|| async {
        info!("Initializing Metrics ...");
        Metrics::new()}
    ).await
}


#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Fetcher metrics
    pub fetch_requests: IntCounterVec,
    pub fetch_failures: IntCounterVec,
    pub fetch_duration: HistogramVec,

    // Cache metrics
    pub cache_hits: IntCounterVec,
    pub cache_misses: IntCounterVec,
    pub stale_served: IntCounterVec,
    pub evictions: IntCounterVec,
    pub cached_tokens: IntGauge,
    pub renewing_tokens: IntGauge,

    // Sweeper
    pub sweeper_ticks: IntCounter,

    // Config/runtime
    pub config_validation_errors: IntCounter,
    pub up: IntGauge,
}

impl Metrics {
    fn new() -> Arc<Self> {
        let registry = Registry::new_custom(Some("bearercache".into()), None).unwrap();

        let metrics: Arc<Metrics> = Arc::new(Self {
            // Fetcher
            fetch_requests: IntCounterVec::new(Opts::new("token_fetch_requests_total", "Total token fetches by key"),&["key"],).unwrap(),
            fetch_failures: IntCounterVec::new(Opts::new("token_fetch_failures_total", "Token fetch failures by key and reason"),&["key", "reason"],).unwrap(),
            fetch_duration: HistogramVec::new(HistogramOpts::new("token_fetch_duration_seconds", "Token fetch duration seconds").buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),&["key"],).unwrap(),

            // Cache
            cache_hits: IntCounterVec::new(Opts::new("cache_hits_total", "Tokens served from cache without I/O"),&["key"],).unwrap(),
            cache_misses: IntCounterVec::new(Opts::new("cache_misses_total", "Lookups that went through renewal"),&["key"],).unwrap(),
            stale_served: IntCounterVec::new(Opts::new("stale_tokens_served_total", "Stale but unexpired tokens served after a failed renewal"),&["key"],).unwrap(),
            evictions: IntCounterVec::new(Opts::new("evictions_total", "Evicted tokens by reason"),&["reason"],).unwrap(),
            cached_tokens: IntGauge::new("cached_tokens", "Tokens currently held in the cache").unwrap(),
            renewing_tokens: IntGauge::new("renewing_tokens", "Renewals currently in flight").unwrap(),

            sweeper_ticks: IntCounter::new("sweeper_ticks_total", "Background sweeper passes").unwrap(),

            // Config/runtime
            config_validation_errors: IntCounter::new("config_validation_errors_total","Validation errors during startup",).unwrap(),
            up: IntGauge::new("up", "1 if service is healthy").unwrap(),

            registry,
        });

        // Register all metrics in the registry
        let reg = &metrics.registry;
        reg.register(Box::new(metrics.fetch_requests.clone())).unwrap();
        reg.register(Box::new(metrics.fetch_failures.clone())).unwrap();
        reg.register(Box::new(metrics.fetch_duration.clone())).unwrap();
        reg.register(Box::new(metrics.cache_hits.clone())).unwrap();
        reg.register(Box::new(metrics.cache_misses.clone())).unwrap();
        reg.register(Box::new(metrics.stale_served.clone())).unwrap();
        reg.register(Box::new(metrics.evictions.clone())).unwrap();
        reg.register(Box::new(metrics.cached_tokens.clone())).unwrap();
        reg.register(Box::new(metrics.renewing_tokens.clone())).unwrap();
        reg.register(Box::new(metrics.sweeper_ticks.clone())).unwrap();
        reg.register(Box::new(metrics.config_validation_errors.clone())).unwrap();
        reg.register(Box::new(metrics.up.clone())).unwrap();

        metrics
    }
}

/// Holds a gauge incremented for its own lifetime, panics included.
pub struct GaugeGuard {
    gauge: IntGauge,
}

impl GaugeGuard {
    pub fn track(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self { gauge: gauge.clone() }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
