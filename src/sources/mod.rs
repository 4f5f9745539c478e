//! Token sources.
//!
//! A `TokenFetcher` performs the credential exchange for one service key. The
//! cache never talks to the network itself; it only calls `fetch`.

use async_trait::async_trait;

use crate::cache::token::Token;
use crate::errors::CacheResult;

pub mod client_credentials;
pub mod parser;

#[async_trait]
pub trait TokenFetcher: Send + Sync {
    /// Obtain a fresh token for `key`. Timeouts are the fetcher's business.
    async fn fetch(&self, key: &str) -> CacheResult<Token>;

    /// Whether `key` has a source at all. Unknown keys are answered with
    /// `CacheError::NotFound` before any bookkeeping.
    fn has_source(&self, _key: &str) -> bool {
        true
    }
}
