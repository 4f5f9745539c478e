use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use serde_json::Value;

use crate::cache::token_cache::{CacheSettings, TokenCache};
use crate::config::settings::{MetricsConfig, SettingsConfig};
use crate::observability::metrics::get_metrics;
use crate::server::server::{build_router, AppState};
use crate::tests::common::{aged_token, build_reqwest_client, spawn_axum, CountingFetcher};

async fn serve(cache: TokenCache) -> String {
    let settings = SettingsConfig {
        metrics: MetricsConfig { path: "/metrics".to_owned(), is_enabled: true },
        ..SettingsConfig::default()
    };
    let state = AppState::new(get_metrics().await, cache);
    let (_handle, addr) = spawn_axum(build_router(state, &settings)).await;
    format!("http://{}", addr)
}

fn fast_settings() -> CacheSettings {
    CacheSettings {
        sweep_interval: Duration::from_millis(50),
        ..CacheSettings::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn token_routes_serve_cached_tokens() {
    let fetcher = Arc::new(CountingFetcher::new());
    let base = serve(TokenCache::new(fetcher.clone(), CacheSettings::default())).await;
    let client = build_reqwest_client();

    let response = client.get(format!("{base}/tokens/kyc")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["access_token"], "kyc-1");
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["expires_in"].as_i64().unwrap() > 3500);

    let bearer = client
        .get(format!("{base}/tokens/kyc/bearer"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(bearer, "Bearer kyc-1");
    assert_eq!(fetcher.calls(), 1);

    let status: Value = client
        .get(format!("{base}/tokens/kyc/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["exists"], true);
    assert_eq!(status["needs_renewal"], false);
    assert_eq!(status["is_renewing"], false);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_and_evict_routes() {
    let fetcher = Arc::new(CountingFetcher::new());
    let cache = TokenCache::new(fetcher.clone(), CacheSettings::default());
    cache.store("kyc", aged_token("seeded", 10)).await;
    let base = serve(cache.clone()).await;
    let client = build_reqwest_client();

    let response = client.post(format!("{base}/tokens/kyc/refresh")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["access_token"], "kyc-1");

    let response = client.delete(format!("{base}/tokens/kyc")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!cache.status("kyc").await.exists);

    let response = client.delete(format!("{base}/tokens/kyc")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "not_found");

    let response = client.get(format!("{base}/tokens/unknown/status")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_failure_maps_to_bad_gateway() {
    let fetcher = Arc::new(CountingFetcher::new().failing());
    let base = serve(TokenCache::new(fetcher, CacheSettings::default())).await;
    let client = build_reqwest_client();

    let response = client.get(format!("{base}/tokens/kyc")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("kyc"));

    // a key that keeps failing still shows up in its status
    let response = client.get(format!("{base}/tokens/kyc/status")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status: Value = response.json().await.unwrap();
    assert_eq!(status["exists"], false);
    assert_eq!(status["consecutive_failures"], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn statistics_and_all_statuses() {
    let fetcher = Arc::new(CountingFetcher::new());
    let cache = TokenCache::new(fetcher, CacheSettings::default());
    cache.store("kyc", aged_token("a", 10)).await;
    cache.store("les", aged_token("b", 3700)).await;
    let base = serve(cache).await;
    let client = build_reqwest_client();

    let statistics: Value = client
        .get(format!("{base}/tokens/statistics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(statistics["total_tokens"], 2);
    assert_eq!(statistics["active_tokens"], 1);
    assert_eq!(statistics["expired_tokens"], 1);

    let statuses: Value = client
        .get(format!("{base}/tokens/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(statuses["kyc"]["needs_renewal"], false);
    assert_eq!(statuses["les"]["needs_renewal"], true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_reflects_sweeper_and_shutdown() {
    let fetcher = Arc::new(CountingFetcher::new());
    let cache = TokenCache::new(fetcher, fast_settings());
    let base = serve(cache.clone()).await;
    let client = build_reqwest_client();

    let response = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let sweeper = cache.start_sweeper();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["healthy"], true);

    cache.shutdown();
    sweeper.await.unwrap();
    let response = client.get(format!("{base}/tokens/les")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let response = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metrics_route_exposes_cache_counters() {
    let fetcher = Arc::new(CountingFetcher::new());
    let cache = TokenCache::new(fetcher, CacheSettings::default());
    cache.get_token("metrics-key").await.unwrap();
    let base = serve(cache).await;

    let body = build_reqwest_client()
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("bearercache_token_fetch_requests_total"), "{body}");
    assert!(body.contains("metrics-key"), "{body}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metrics_route_is_absent_when_disabled() {
    let fetcher = Arc::new(CountingFetcher::new());
    let state = AppState::new(get_metrics().await, TokenCache::new(fetcher, CacheSettings::default()));
    let (_handle, addr) = spawn_axum(build_router(state, &SettingsConfig::default())).await;

    let response = build_reqwest_client()
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
