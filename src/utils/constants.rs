//! Shared constants and invariants

pub const DEFAULT_RENEWAL_LEAD_TIME_SECS: u64 = 20;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_EVICTION_GRACE_SECS: u64 = 300;
pub const DEFAULT_UNHEALTHY_AFTER_FAILURES: u32 = 3;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5000;

pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";
pub const GRANT_TYPE_CLIENT_CREDENTIALS: &str = "client_credentials";
