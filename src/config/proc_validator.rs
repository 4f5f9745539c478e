//! Configuration validation with aggregated errors.
//! - Aggregates all issues into Vec<String>
//! - Validates settings (intervals, retry, logging, metrics, server)
//! - Validates every source (endpoint URL, credentials, value sources)

use tracing::{error, info};

use crate::config::settings::{RetryConfig, SettingsConfig};
use crate::config::sources::{ServiceConfig, SourceConfig, ValueSource};
use crate::observability::metrics::get_metrics;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Public entrypoint: returns Ok(()) or Err(Vec<String>) containing all issues.
pub async fn validate_service_config(cfg: &ServiceConfig) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    validate_settings(&cfg.settings, &mut errors);

    if cfg.sources.is_empty() {
        errors.push("config: 'sources' is empty; at least one source required".to_string());
    }

    let mut keys: Vec<&String> = cfg.sources.keys().collect();
    keys.sort();
    for key in keys {
        if let Some(source) = cfg.sources.get(key) {
            validate_source(key, source, &mut errors);
        }
    }

    if errors.is_empty() {
        info!("config validated, {} source(s)", cfg.sources.len());
        return Ok(());
    }

    let metrics = get_metrics().await;
    for issue in &errors {
        error!("config validation: {}", issue);
        metrics.config_validation_errors.inc();
    }
    Err(errors)
}

fn validate_settings(settings: &SettingsConfig, errors: &mut Vec<String>) {
    if settings.sweep_interval_seconds == Some(0) {
        errors.push("settings.sweep_interval_seconds must be > 0".to_string());
    }
    if settings.unhealthy_after_failures == Some(0) {
        errors.push("settings.unhealthy_after_failures must be > 0".to_string());
    }
    if let Some(retry) = &settings.retry {
        validate_retry(retry, errors);
    }
    if let Some(logging) = &settings.logging {
        if !LOG_LEVELS.contains(&logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "settings.logging.level '{}' must be one of {:?}",
                logging.level, LOG_LEVELS
            ));
        }
    }
    if settings.metrics.is_enabled && !settings.metrics.path.starts_with('/') {
        errors.push(format!(
            "settings.metrics.path '{}' must start with '/'",
            settings.metrics.path
        ));
    }
    if settings.server.port.parse::<u16>().is_err() {
        errors.push(format!(
            "settings.server.port '{}' is not a valid port",
            settings.server.port
        ));
    }
}

fn validate_retry(retry: &RetryConfig, errors: &mut Vec<String>) {
    if retry.attempts == Some(0) {
        errors.push("settings.retry.attempts must be >= 1".to_string());
    }
    if let (Some(base), Some(max)) = (retry.base_delay_ms, retry.max_delay_ms) {
        if max < base {
            errors.push(format!(
                "settings.retry.max_delay_ms ({}) must be >= base_delay_ms ({})",
                max, base
            ));
        }
    }
}

fn validate_source(key: &str, source: &SourceConfig, errors: &mut Vec<String>) {
    if key.trim().is_empty() {
        errors.push("source key must not be empty".to_string());
    }

    let url = source.token_url.trim();
    if url.is_empty() {
        errors.push(format!("source['{}'].token_url must not be empty", key));
    } else if !(url.starts_with("http://") || url.starts_with("https://")) {
        errors.push(format!(
            "source['{}'].token_url '{}' must be an http(s) URL",
            key, url
        ));
    }

    validate_value(key, "client_id", &source.client_id, errors);
    validate_value(key, "client_secret", &source.client_secret, errors);
    if let Some(scope) = &source.scope {
        validate_value(key, "scope", scope, errors);
    }
    for (section, values) in [("headers", &source.headers), ("params", &source.params)] {
        if let Some(values) = values {
            for (name, value) in values {
                validate_value(key, &format!("{}.{}", section, name), value, errors);
            }
        }
    }

    if source.grant_type.as_ref().is_some_and(|grant| grant.trim().is_empty()) {
        errors.push(format!("source['{}'].grant_type must not be empty", key));
    }
    if source.timeout_ms == Some(0) {
        errors.push(format!("source['{}'].timeout_ms must be > 0", key));
    }
}

fn validate_value(key: &str, field: &str, value: &ValueSource, errors: &mut Vec<String>) {
    let empty = match value {
        ValueSource::Literal { value } => value.is_empty(),
        ValueSource::FromEnv { from_env } => from_env.trim().is_empty(),
        ValueSource::FromFile { path } => path.trim().is_empty(),
    };
    if empty {
        errors.push(format!("source['{}'].{} must not be empty", key, field));
    }
}
