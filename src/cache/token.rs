use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::utils::constants::{DEFAULT_RENEWAL_LEAD_TIME_SECS, DEFAULT_TOKEN_TYPE};

/// One issued access token plus the timestamps derived from its lifetime.
///
/// `expires_at` is the hard expiry. `cache_expires_at` sits `renewal_lead_time`
/// before it and marks the point from which the cache treats the token as stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
    pub cache_expires_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    renewal_lead_time: u64,
}

impl Token {
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>, expires_in: u64) -> Self {
        let token_type = token_type.into();
        let issued_at = Utc::now();
        let mut token = Self {
            access_token: access_token.into(),
            token_type: if token_type.is_empty() { DEFAULT_TOKEN_TYPE.to_owned() } else { token_type },
            scope: None,
            refresh_token: None,
            issued_at,
            expires_in: 0,
            expires_at: issued_at,
            cache_expires_at: issued_at,
            renewal_lead_time: DEFAULT_RENEWAL_LEAD_TIME_SECS,
        };
        token.set_expires_in(expires_in);
        token
    }

    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self.derive_expiry();
        self
    }

    pub fn with_expires_in(mut self, expires_in: u64) -> Self {
        self.set_expires_in(expires_in);
        self
    }

    pub fn with_renewal_lead_time(mut self, lead_time_seconds: u64) -> Self {
        self.renewal_lead_time = lead_time_seconds;
        self.derive_expiry();
        self
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    fn set_expires_in(&mut self, expires_in: u64) {
        // expires_at must stay strictly after issued_at
        self.expires_in = expires_in.max(1);
        self.derive_expiry();
    }

    fn derive_expiry(&mut self) {
        self.expires_at = self.issued_at + seconds(self.expires_in);
        self.cache_expires_at = self.expires_at - seconds(self.renewal_lead_time);
    }

    pub fn renewal_lead_time(&self) -> u64 {
        self.renewal_lead_time
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_cache_expired(&self) -> bool {
        self.is_cache_expired_at(Utc::now())
    }

    pub fn is_cache_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.cache_expires_at
    }

    /// Stale and nobody is renewing it yet. The renewing flag belongs to the
    /// renewal coordinator, so the caller passes it in.
    pub fn needs_renewal(&self, is_renewing: bool) -> bool {
        self.needs_renewal_at(Utc::now(), is_renewing)
    }

    pub fn needs_renewal_at(&self, now: DateTime<Utc>, is_renewing: bool) -> bool {
        self.is_cache_expired_at(now) && !is_renewing
    }

    pub fn seconds_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds()
    }

    pub fn seconds_until_cache_expiry(&self) -> i64 {
        (self.cache_expires_at - Utc::now()).num_seconds()
    }

    /// How long the token has been past its hard expiry, if it is.
    pub fn expired_for(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (now - self.expires_at).to_std().ok().filter(|_| self.is_expired_at(now))
    }

    pub fn bearer_header_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

// lifetimes above a century are clamped to keep chrono arithmetic in range
const MAX_LIFETIME_SECS: u64 = 100 * 365 * 24 * 60 * 60;

fn seconds(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_LIFETIME_SECS) as i64)
}
