//! Error types for the feed cache proxy

use feed_cache_store::StoreError;
use std::fmt;

#[derive(Debug)]
pub enum ProxyError {
    /// Target does not start with http:// or https://
    InvalidUrl(String),
    /// Transport failure talking to the origin
    Network(Box<reqwest::Error>),
    /// Origin answered with a status other than 200
    Upstream(u16),
    CachePersist(StoreError),
    CacheRead(StoreError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl ProxyError {
    /// Status code recorded for a failure that produced no origin response
    pub fn synthetic_status(&self) -> u16 {
        match self {
            ProxyError::Upstream(status) => *status,
            _ => 500,
        }
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::InvalidUrl(url) => write!(f, "Invalid URL path: {}", url),
            ProxyError::Network(err) => write!(f, "Network error: {}", err),
            ProxyError::Upstream(status) => write!(f, "Origin returned status {}", status),
            ProxyError::CachePersist(err) => write!(f, "Failed to persist cache entry: {}", err),
            ProxyError::CacheRead(err) => write!(f, "Failed to read cache entry: {}", err),
            ProxyError::Io(err) => write!(f, "IO error: {}", err),
            ProxyError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Network(err) => Some(err.as_ref()),
            ProxyError::CachePersist(err) | ProxyError::CacheRead(err) => Some(err),
            ProxyError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Network(Box::new(err))
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for ProxyError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ProxyError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
