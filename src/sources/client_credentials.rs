//! OAuth2 client-credentials fetcher.
//!
//! One `SourceConfig` per service key: token endpoint, credentials, optional
//! scope, extra headers and form params. Values are resolved on every fetch so
//! rotated secrets (env or mounted files) are picked up without a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::{env, fs};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::cache::token::Token;
use crate::config::sources::{AuthStyle, ServiceConfig, SourceConfig, ValueSource};
use crate::errors::{CacheError, CacheResult};
use crate::helpers::time::get_renewal_lead_time_seconds;
use crate::resilience::retry::RetrySettings;
use crate::sources::parser::parse_token_response;
use crate::sources::TokenFetcher;
use crate::utils::constants::{DEFAULT_HTTP_TIMEOUT_MS, GRANT_TYPE_CLIENT_CREDENTIALS};

// error bodies from token endpoints can be large html pages
const MAX_ERROR_BODY_CHARS: usize = 256;

#[derive(Debug, Clone)]
pub struct ClientCredentialsFetcher {
    client: Client,
    sources: HashMap<String, Arc<SourceConfig>>,
    retry: RetrySettings,
    lead_time_seconds_settings: Option<u64>,
}

impl ClientCredentialsFetcher {
    pub fn new(client: Client, config: &ServiceConfig) -> Self {
        Self {
            client,
            sources: config
                .sources
                .iter()
                .map(|(key, source)| (key.to_owned(), Arc::new(source.clone())))
                .collect(),
            retry: RetrySettings::from(config.settings.retry.as_ref()),
            lead_time_seconds_settings: config.settings.renewal_lead_time_seconds,
        }
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sources.keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn fetch_once(&self, key: &str, source: &SourceConfig) -> CacheResult<Token> {
        let client_id = resolve(key, "client_id", &source.client_id)?;
        let client_secret = resolve(key, "client_secret", &source.client_secret)?;

        let grant_type = source
            .grant_type
            .clone()
            .unwrap_or_else(|| GRANT_TYPE_CLIENT_CREDENTIALS.to_owned());
        let mut form: Vec<(String, String)> = vec![("grant_type".to_owned(), grant_type)];

        let timeout = Duration::from_millis(source.timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS));
        let mut request = self.client.post(&source.token_url).timeout(timeout);

        match source.auth_style {
            AuthStyle::Form => {
                form.push(("client_id".to_owned(), client_id));
                form.push(("client_secret".to_owned(), client_secret));
            }
            AuthStyle::Basic => {
                request = request.basic_auth(client_id, Some(client_secret));
            }
        }
        if let Some(scope) = &source.scope {
            form.push(("scope".to_owned(), resolve(key, "scope", scope)?));
        }
        if let Some(params) = &source.params {
            for (name, value) in params {
                form.push((name.to_owned(), resolve(key, name, value)?));
            }
        }
        if let Some(headers) = &source.headers {
            for (name, value) in headers {
                request = request.header(name, resolve(key, name, value)?);
            }
        }

        debug!(key = %key, url = %source.token_url, "requesting token");
        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| CacheError::fetch(key, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CacheError::fetch(key, format!("cannot read response body: {}", e)))?;

        if !status.is_success() {
            let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(CacheError::fetch(
                key,
                format!("HTTP request failed: {} {}", status, excerpt.trim()),
            ));
        }

        let lead_time = get_renewal_lead_time_seconds(
            self.lead_time_seconds_settings,
            source.renewal_lead_time_seconds,
        );
        parse_token_response(&body, lead_time)
            .map_err(|e| CacheError::fetch(key, format!("malformed token response: {:#}", e)))
    }
}

#[async_trait]
impl TokenFetcher for ClientCredentialsFetcher {
    async fn fetch(&self, key: &str) -> CacheResult<Token> {
        let source = self
            .sources
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::not_found(key))?;

        self.retry
            .run_with_retry(|| self.fetch_once(key, &source))
            .await
    }

    fn has_source(&self, key: &str) -> bool {
        self.sources.contains_key(key)
    }
}

fn resolve(key: &str, field: &str, value: &ValueSource) -> CacheResult<String> {
    prepare_value(value)
        .and_then(|resolved| {
            if resolved.is_empty() {
                Err(anyhow!("value is empty"))
            } else {
                Ok(resolved)
            }
        })
        .map_err(|e| CacheError::configuration(key, format!("cannot resolve {}: {}", field, e)))
}

fn prepare_value(value: &ValueSource) -> Result<String> {
    match value {
        ValueSource::Literal { value } => Ok(value.to_owned()),
        ValueSource::FromEnv { from_env } => {
            env::var(from_env).map_err(|err| anyhow!("env {}: {}", from_env, err))
        }
        ValueSource::FromFile { path } => fs::read_to_string(path)
            .map_err(|err| anyhow!("file {}: {}", path, err))
            .map(|res| res.trim().to_string()),
    }
}
