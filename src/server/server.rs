use std::future::Future;

use anyhow::{Context, Result};
use axum::Router;
use tracing::info;

use crate::cache::token_cache::TokenCache;
use crate::config::settings::SettingsConfig;
use crate::endpoints::{health, tokens};
use crate::observability::metrics::{get_metrics, Metrics};
use crate::observability::routes::MetricsState;

#[derive(Clone)]
pub struct AppState {
    pub metrics_state: MetricsState,
    pub cache: TokenCache,
}

impl AppState {
    pub fn new(metrics: &Metrics, cache: TokenCache) -> Self {
        Self {
            metrics_state: MetricsState::new(metrics.registry.clone()),
            cache,
        }
    }
}

/// Token, status, health and (if enabled) metrics routes over one state.
pub fn build_router(state: AppState, settings_config: &SettingsConfig) -> Router {
    Router::new()
        .merge(state.metrics_state.router(&settings_config.metrics))
        .merge(tokens::router())
        .merge(health::router())
        .with_state(state)
}

/// Serve the HTTP API until `shutdown` resolves.
pub async fn start<S>(settings_config: &SettingsConfig, cache: TokenCache, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let metrics = get_metrics().await;
    let state = AppState::new(metrics, cache);
    let app = build_router(state, settings_config);

    let bind_addr = format!("{}:{}", settings_config.server.host, settings_config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", bind_addr))?;
    info!("http server listening on {}", listener.local_addr()?);

    metrics.up.set(1);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server failed")?;
    metrics.up.set(0);
    info!("http server stopped");

    Ok(())
}
