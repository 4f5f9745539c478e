use axum::{
    extract::{Path, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::cache::token::Token;
use crate::errors::CacheError;
use crate::server::server::AppState;

static TEXT_PLAIN: &str = "text/plain; charset=utf-8";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tokens/status", get(get_all_statuses))
        .route("/tokens/statistics", get(get_statistics))
        .route("/tokens/{key}", get(get_token).delete(evict_token))
        .route("/tokens/{key}/bearer", get(get_bearer))
        .route("/tokens/{key}/status", get(get_status))
        .route("/tokens/{key}/refresh", post(refresh_token))
}

/// What callers see of a cached token. `expires_in` is the remaining lifetime.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl From<Token> for TokenResponse {
    fn from(token: Token) -> Self {
        Self {
            expires_in: token.seconds_until_expiry().max(0),
            expires_at: token.expires_at,
            access_token: token.access_token,
            token_type: token.token_type,
            scope: token.scope,
        }
    }
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound { .. } => StatusCode::NOT_FOUND,
            CacheError::Fetch { .. } => StatusCode::BAD_GATEWAY,
            CacheError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CacheError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            warn!(reason = self.reason(), "request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string(), "reason": self.reason() }))).into_response()
    }
}

async fn get_token(State(state): State<AppState>, Path(key): Path<String>) -> Result<Json<TokenResponse>, CacheError> {
    let token = state.cache.get_token(&key).await?;
    Ok(Json(TokenResponse::from(token)))
}

async fn get_bearer(State(state): State<AppState>, Path(key): Path<String>) -> Result<Response, CacheError> {
    let bearer = state.cache.get_bearer_token(&key).await?;
    Ok(([(CONTENT_TYPE, TEXT_PLAIN)], bearer).into_response())
}

async fn refresh_token(State(state): State<AppState>, Path(key): Path<String>) -> Result<Json<TokenResponse>, CacheError> {
    info!(key = %key, "manual refresh requested");
    let token = state.cache.refresh(&key).await?;
    Ok(Json(TokenResponse::from(token)))
}

async fn evict_token(State(state): State<AppState>, Path(key): Path<String>) -> Result<Response, CacheError> {
    if !state.cache.evict(&key).await {
        return Err(CacheError::not_found(&key));
    }
    Ok(Json(json!({ "key": key, "evicted": true })).into_response())
}

async fn get_status(State(state): State<AppState>, Path(key): Path<String>) -> Result<Response, CacheError> {
    let status = state.cache.status(&key).await;
    if !status.exists && status.consecutive_failures == 0 {
        return Err(CacheError::not_found(&key));
    }
    Ok(Json(status).into_response())
}

async fn get_all_statuses(State(state): State<AppState>) -> Response {
    Json(state.cache.all_statuses().await).into_response()
}

async fn get_statistics(State(state): State<AppState>) -> Response {
    Json(state.cache.statistics().await).into_response()
}
