//! Feed Cache Proxy - caching reverse-fetch proxy for feeds
//!
//! `GET /<url>` answers with the last captured response for `<url>`, fetching
//! it from the origin on first use. Every cached URL gets a background task
//! that refreshes it each TTL and evicts it once nobody has asked for it
//! within the retention window.

mod access;
mod config;
mod error;
mod fetcher;
mod scheduler;
mod server;
#[cfg(test)]
mod test_support;
mod types;

use crate::access::AccessTracker;
use crate::config::load_config;
use crate::error::{ProxyError, Result};
use crate::fetcher::OriginFetcher;
use crate::scheduler::RefreshScheduler;
use crate::server::{start_server, ServerState, SharedState};
use feed_cache_store::CacheStore;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("feed_cache_proxy=info".parse()?)
        .add_directive("feed_cache_store=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    let config = load_config()?;
    info!("Starting feed cache proxy...");
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Refresh TTL: {} seconds", config.ttl.as_secs());
    info!("Max idle: {} seconds", config.max_idle.as_secs());

    let store = Arc::new(CacheStore::with_io_timeout(
        config.cache_dir.clone(),
        config.io_timeout,
    ));
    store
        .init()
        .await
        .map_err(|e| ProxyError::Config(format!("Cache dir unusable: {}", e)))?;

    let fetcher = Arc::new(OriginFetcher::new(
        store.clone(),
        config.connect_timeout,
        config.read_timeout,
    )?);
    let access = AccessTracker::new();
    let scheduler =
        RefreshScheduler::new(fetcher.clone(), access.clone(), config.ttl, config.max_idle);

    // Resume a refresh cycle for everything already on disk
    let cached_urls = store
        .list_all()
        .await
        .map_err(|e| ProxyError::Config(format!("Failed to list cache dir: {}", e)))?;
    for url in &cached_urls {
        info!(url = %url, "Loaded from cache");
        scheduler.ensure_running(url).await;
    }
    info!("Resumed {} cached URLs", cached_urls.len());

    let state: SharedState = Arc::new(ServerState::new(fetcher, access, scheduler));

    // Start HTTP server (blocking)
    start_server(state, &config.host, config.port).await?;

    Ok(())
}
