use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use http::{header::CONTENT_TYPE, StatusCode};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{debug, error};

use crate::config::settings::MetricsConfig;
use crate::server::server::AppState;

static PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

/// Registry scraped by the metrics route.
#[derive(Clone)]
pub struct MetricsState {
    pub registry: Arc<Registry>,
}

impl MetricsState {
    pub fn new(registry: Registry) -> Self {
        Self { registry: Arc::new(registry) }
    }

    /// Empty router when metrics are disabled.
    pub fn router(&self, metrics_config: &MetricsConfig) -> Router<AppState> {
        if !metrics_config.is_enabled {
            return Router::new();
        }
        debug!(path = %metrics_config.path, "metrics route enabled");
        Router::new().route(metrics_config.path.as_str(), get(scrape_metrics))
    }
}

async fn scrape_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let families = state.metrics_state.registry.gather();
    let mut buffer = Vec::new();

    match TextEncoder::new().encode(&families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(CONTENT_TYPE, PROMETHEUS_TEXT)],
            String::from_utf8_lossy(&buffer).into_owned(),
        ),
        Err(e) => {
            error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, [(CONTENT_TYPE, PROMETHEUS_TEXT)], String::new())
        }
    }
}
