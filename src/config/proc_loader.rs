use std::{fs, path::Path};
use crate::config::settings::LoggingConfig;
use crate::config::sources::ServiceConfig;
use crate::observability::metrics::get_metrics;
use crate::utils::constants::{DEFAULT_EVICTION_GRACE_SECS, DEFAULT_RENEWAL_LEAD_TIME_SECS, DEFAULT_SWEEP_INTERVAL_SECS};
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tracing::{debug, error};
use crate::config::proc_validator;

/// Load and validate config from YAML file
pub async fn file_to_config(path: &Path) -> Result<ServiceConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;

    let expanded = expand_env_vars(&content)?;
    parse_config(expanded).await
}

pub async fn parse_config(content: String) -> Result<ServiceConfig> {
    let metrics = get_metrics().await;
    let mut service_config: ServiceConfig = serde_yaml::from_str(&content)
        .inspect_err(|e| {
            error!("parse config error: {}", e);
            metrics.config_validation_errors.inc();
        })?;

    // Apply defaults
    let settings = &mut service_config.settings;
    if settings.logging.is_none() {
        settings.logging = Some(LoggingConfig::default());
    }
    settings.renewal_lead_time_seconds.get_or_insert(DEFAULT_RENEWAL_LEAD_TIME_SECS);
    settings.sweep_interval_seconds.get_or_insert(DEFAULT_SWEEP_INTERVAL_SECS);
    settings.eviction_grace_seconds.get_or_insert(DEFAULT_EVICTION_GRACE_SECS);

    debug!("validation config ...");
    proc_validator::validate_service_config(&service_config)
        .await
        .map_err(|errors| anyhow!("invalid configuration:\n  - {}", errors.join("\n  - ")))?;

    Ok(service_config)
}

/// Replace `${VAR}` and `${VAR:default}` with environment values.
fn expand_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{(\w+)(?::([^\}]+))?\}")?;
    Ok(re.replace_all(input, |caps: &regex::Captures| {
        let var = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var).unwrap_or_else(|_| default.to_string())
    })
    .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::LogFormat;
    use serial_test::serial;
    use std::io::Write;

    const CONFIG: &str = r#"
settings:
  sweep_interval_seconds: 15
  retry:
    attempts: 2
    base_delay_ms: 10
    max_delay_ms: 20
  server:
    host: 127.0.0.1
    port: "${BEARER_CACHE_TEST_PORT:9090}"
sources:
  kyc:
    token_url: https://auth.example.com/oauth2/token
    client_id: { value: kyc-client }
    client_secret: { from_env: KYC_CLIENT_SECRET }
  apigee:
    token_url: ${BEARER_CACHE_TEST_APIGEE_URL:https://apigee.example.com/token}
    client_id: { value: apigee-client }
    client_secret: { value: apigee-secret }
    auth_style: basic
    renewal_lead_time_seconds: 45
"#;

    #[test]
    #[serial]
    fn env_vars_are_expanded_with_defaults() {
        std::env::set_var("BEARER_CACHE_TEST_PORT", "7070");
        std::env::remove_var("BEARER_CACHE_TEST_APIGEE_URL");
        let expanded = expand_env_vars(CONFIG).unwrap();
        assert!(expanded.contains("port: \"7070\""));
        assert!(expanded.contains("token_url: https://apigee.example.com/token"));
        std::env::remove_var("BEARER_CACHE_TEST_PORT");
    }

    #[tokio::test]
    #[serial]
    async fn file_config_gets_defaults_applied() {
        std::env::remove_var("BEARER_CACHE_TEST_PORT");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let config = file_to_config(file.path()).await.unwrap();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.settings.server.port, "9090");
        assert_eq!(config.settings.sweep_interval_seconds, Some(15));
        assert_eq!(config.settings.renewal_lead_time_seconds, Some(DEFAULT_RENEWAL_LEAD_TIME_SECS));
        assert_eq!(config.settings.eviction_grace_seconds, Some(DEFAULT_EVICTION_GRACE_SECS));
        assert_eq!(config.settings.logging.unwrap().format, LogFormat::Compact);
        assert_eq!(config.sources["apigee"].renewal_lead_time_seconds, Some(45));
    }

    #[tokio::test]
    async fn invalid_config_reports_every_issue() {
        let yaml = r#"
settings:
  sweep_interval_seconds: 0
sources:
  kyc:
    token_url: ftp://auth.example.com/token
    client_id: { value: "" }
    client_secret: { value: secret }
"#;
        let err = parse_config(yaml.to_owned()).await.unwrap_err().to_string();
        assert!(err.contains("sweep_interval_seconds"), "{err}");
        assert!(err.contains("token_url"), "{err}");
        assert!(err.contains("client_id"), "{err}");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let result = file_to_config(Path::new("/definitely/not/here.yaml")).await;
        assert!(result.is_err());
    }
}
