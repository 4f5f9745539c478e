use chrono::{DateTime, Utc};
use serde::Serialize;

/// Read-only snapshot of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    pub key: String,
    pub exists: bool,
    pub seconds_until_expiry: Option<i64>,
    pub seconds_until_cache_expiry: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub needs_renewal: bool,
    pub is_renewing: bool,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Entries classified at the instant of the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    pub total_tokens: usize,
    /// not hard-expired
    pub active_tokens: usize,
    /// hard-expired but not swept yet
    pub expired_tokens: usize,
    pub renewing_tokens: usize,
    /// keys whose last fetch failed
    pub failing_keys: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub healthy: bool,
    pub sweeper_alive: bool,
    pub failing_keys: Vec<String>,
}

/// What one sweeper pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub refreshing: Vec<String>,
    pub evicted: Vec<String>,
    /// keys whose failure record was forgotten
    pub pruned_failures: Vec<String>,
}
