//! Error taxonomy of the token cache.
//!
//! `CacheError` is `Clone` because a single renewal outcome is handed to the
//! leader and to every caller that waited on it.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The token fetcher failed (network, non-success status, malformed response).
    /// Recoverable: retried on the next access or sweep.
    #[error("token fetch for '{key}' failed: {cause}")]
    Fetch { key: String, cause: String },

    /// No source is configured for the key, or status/eviction asked for a
    /// key the cache does not hold.
    #[error("no token available for '{key}'")]
    NotFound { key: String },

    /// Missing endpoint or credentials for a key. Fatal for that key until corrected.
    #[error("configuration error for '{key}': {reason}")]
    Configuration { key: String, reason: String },

    /// The cache was shut down while the caller was waiting on a renewal.
    #[error("token cache is shut down")]
    Shutdown,
}

impl CacheError {
    pub fn fetch(key: &str, cause: impl std::fmt::Display) -> Self {
        CacheError::Fetch {
            key: key.to_owned(),
            cause: cause.to_string(),
        }
    }

    pub fn configuration(key: &str, reason: impl Into<String>) -> Self {
        CacheError::Configuration {
            key: key.to_owned(),
            reason: reason.into(),
        }
    }

    pub fn not_found(key: &str) -> Self {
        CacheError::NotFound { key: key.to_owned() }
    }

    /// Only fetch failures are worth retrying; configuration problems won't fix themselves.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Fetch { .. })
    }

    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            CacheError::Fetch { .. } => "fetch",
            CacheError::NotFound { .. } => "not_found",
            CacheError::Configuration { .. } => "configuration",
            CacheError::Shutdown => "shutdown",
        }
    }
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
