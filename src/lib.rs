//! # Bearer Cache Library
//!
//! Keeps one bearer token per service key, renews it before it expires and
//! makes sure concurrent callers share a single fetch.
//!
//! Modules:
//! - `cache`: token cache, single-flight renewal and the background sweeper
//! - `sources`: the `TokenFetcher` seam and the OAuth2 client-credentials fetcher
//! - `config`: YAML configuration, defaults and validation
//! - `endpoints` / `server`: HTTP management surface

pub mod cache;
pub mod config;
pub mod endpoints;
pub mod errors;
pub mod helpers;
pub mod observability;
pub mod resilience;
pub mod server;
pub mod sources;
pub mod utils;

#[cfg(test)]
mod tests;

pub use crate::cache::token::Token;
pub use crate::cache::token_cache::{CacheSettings, TokenCache};
pub use crate::errors::{CacheError, CacheResult};
pub use crate::sources::TokenFetcher;
