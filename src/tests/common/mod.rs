pub use axum::Router;
pub use serde_json::json;
pub use tokio::task::JoinHandle;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;

use crate::cache::token::Token;
use crate::cache::token_cache::{CacheSettings, TokenCache};
use crate::errors::{CacheError, CacheResult};
use crate::sources::TokenFetcher;

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

pub fn build_reqwest_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("reqwest client")
}

/// In-memory fetcher that counts calls. Tokens are named `<key>-<call number>`.
pub struct CountingFetcher {
    calls: AtomicUsize,
    failing: AtomicBool,
    failures_left: AtomicUsize,
    delay: Duration,
    expires_in: u64,
    lead_time: u64,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            failures_left: AtomicUsize::new(0),
            delay: Duration::ZERO,
            expires_in: 3600,
            lead_time: 20,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` fetches, then succeed again.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenFetcher for CountingFetcher {
    async fn fetch(&self, key: &str) -> CacheResult<Token> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if scripted_failure || self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::fetch(key, "token endpoint unavailable"));
        }
        Ok(Token::new(format!("{}-{}", key, call), "Bearer", self.expires_in)
            .with_renewal_lead_time(self.lead_time))
    }
}

pub fn cache_with(fetcher: &Arc<CountingFetcher>) -> TokenCache {
    cache_with_settings(fetcher, CacheSettings::default())
}

pub fn cache_with_settings(fetcher: &Arc<CountingFetcher>, settings: CacheSettings) -> TokenCache {
    TokenCache::new(fetcher.clone(), settings)
}

/// Token issued `age_secs` ago with a one hour lifetime and 20s lead time.
pub fn aged_token(value: &str, age_secs: i64) -> Token {
    Token::new(value, "Bearer", 3600)
        .with_renewal_lead_time(20)
        .with_issued_at(Utc::now() - chrono::Duration::seconds(age_secs))
}
