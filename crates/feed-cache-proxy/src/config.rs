//! Command-line and environment configuration

use crate::error::{ProxyError, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_IDLE_SECS: u64 = 7 * 24 * 60 * 60; // 1 week

/// Caching reverse-fetch proxy: GET /<url> serves a cached copy of <url>
#[derive(Debug, Parser)]
#[command(name = "feed-cache-proxy", version, about)]
pub struct Cli {
    /// Address to bind the HTTP server to
    #[arg(long, env = "FEED_PROXY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the HTTP server to
    #[arg(long, env = "FEED_PROXY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory holding cached entries
    #[arg(long, env = "FEED_PROXY_CACHE_DIR", default_value = "./var/cache")]
    pub cache_dir: PathBuf,

    /// Seconds between background refreshes of a cached URL
    #[arg(long, env = "FEED_PROXY_TTL_SECS", default_value_t = 3600)]
    pub ttl: u64,

    /// Seconds without requests before a cached URL is evicted
    #[arg(long, env = "FEED_PROXY_MAX_IDLE_SECS", default_value_t = DEFAULT_MAX_IDLE_SECS)]
    pub max_idle: u64,

    /// Seconds allowed to connect to an origin
    #[arg(long, env = "FEED_PROXY_CONNECT_TIMEOUT_SECS", default_value_t = 1)]
    pub connect_timeout: u64,

    /// Seconds to wait for each read of an origin response
    #[arg(long, env = "FEED_PROXY_READ_TIMEOUT_SECS", default_value_t = 10)]
    pub read_timeout: u64,

    /// Seconds allowed for a single cache file operation
    #[arg(long, env = "FEED_PROXY_IO_TIMEOUT_SECS", default_value_t = 5)]
    pub io_timeout: u64,
}

/// Runtime configuration for the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub cache_dir: PathBuf,
    pub ttl: Duration,
    pub max_idle: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cache_dir: PathBuf::from("./var/cache"),
            ttl: Duration::from_secs(3600),
            max_idle: Duration::from_secs(DEFAULT_MAX_IDLE_SECS),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(5),
        }
    }
}

impl TryFrom<Cli> for ProxyConfig {
    type Error = ProxyError;

    fn try_from(cli: Cli) -> Result<Self> {
        if cli.ttl == 0 {
            return Err(ProxyError::Config("--ttl must be at least 1 second".to_string()));
        }

        Ok(Self {
            host: cli.host,
            port: cli.port,
            cache_dir: cli.cache_dir,
            ttl: Duration::from_secs(cli.ttl),
            max_idle: Duration::from_secs(cli.max_idle),
            connect_timeout: Duration::from_secs(cli.connect_timeout),
            read_timeout: Duration::from_secs(cli.read_timeout),
            io_timeout: Duration::from_secs(cli.io_timeout),
        })
    }
}

/// Parse the process arguments into a configuration
pub fn load_config() -> Result<ProxyConfig> {
    ProxyConfig::try_from(Cli::parse())
}
