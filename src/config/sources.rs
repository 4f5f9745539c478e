use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use crate::config::settings::SettingsConfig;


/// ================================
/// Full service configuration
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default)]
    pub settings: SettingsConfig,
    /// service key (e.g. "kyc", "les", "apigee") -> token endpoint and credentials
    pub sources: HashMap<String, SourceConfig>,
}

/// ================================
/// Sources
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// OAuth2 token endpoint, always called with POST
    pub token_url: String,
    pub client_id: ValueSource,
    pub client_secret: ValueSource,
    pub scope: Option<ValueSource>,
    /// defaults to `client_credentials`
    pub grant_type: Option<String>,
    #[serde(default)]
    pub auth_style: AuthStyle,
    /// extra request headers
    pub headers: Option<HashMap<String, ValueSource>>,
    /// extra form parameters
    pub params: Option<HashMap<String, ValueSource>>,
    pub timeout_ms: Option<u64>,
    pub renewal_lead_time_seconds: Option<u64>,
}

/// Where the client credentials travel.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthStyle {
    /// `client_id` / `client_secret` form fields
    #[default]
    Form,
    /// HTTP Basic `Authorization` header
    Basic,
}

/// Value sources for credentials, headers and params
#[derive(Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ValueSource {
    Literal {
        value: String,
    },
    FromEnv {
        from_env: String,
    },
    FromFile {
        path: String,
    },
}

// literal values are usually secrets
impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Literal { .. } => f.write_str("Literal([REDACTED])"),
            ValueSource::FromEnv { from_env } => f.debug_struct("FromEnv").field("from_env", from_env).finish(),
            ValueSource::FromFile { path } => f.debug_struct("FromFile").field("path", path).finish(),
        }
    }
}
