use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use reqwest::Client;
use tracing::info;

use bearer_cache::cache::token_cache::{CacheSettings, TokenCache};
use bearer_cache::server;
use bearer_cache::sources::client_credentials::ClientCredentialsFetcher;
use bearer_cache::utils::config_loader;
use bearer_cache::utils::logging::{self, LogLevel};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env = "CONFIG", default_value = "bearer-cache.yaml")]
    config: String,
    #[arg(long, env = "LOG_LEVEL", value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // -------------------------------
    // 1. Read args, load YAML config
    // -------------------------------

    let args = Args::parse();
    let service_config = config_loader::run(&args.config).await?;
    logging::run(&service_config, args.log_level).await?;

    // -------------------------------
    // 2. Create request client and fetcher
    // -------------------------------

    let client = Client::builder().build()?;
    let fetcher = ClientCredentialsFetcher::new(client, &service_config);
    info!(keys = ?fetcher.keys(), "token sources loaded");

    // -------------------------------
    // 3. Create the cache, start the sweeper
    // -------------------------------

    let cache = TokenCache::new(Arc::new(fetcher), CacheSettings::from(&service_config.settings));
    let sweeper = cache.start_sweeper();

    // -------------------------------
    // 4. Serve http until a shutdown signal
    // -------------------------------

    let shutdown_cache = cache.clone();
    let shutdown = async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        shutdown_cache.shutdown();
    };

    info!("Service starting...");
    server::server::start(&service_config.settings, cache.clone(), shutdown).await?;

    cache.shutdown();
    sweeper.await?;
    info!("Service stopped");

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
