//! Origin fetching and write-through to the cache store

use crate::error::{ProxyError, Result};
use chrono::Utc;
use feed_cache_store::{CacheEntry, CacheStore, Headers};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_USER_AGENT: &str = "feed-cache-proxy/0.1";

/// Request headers never sent upstream. `host` names the proxy rather than the
/// origin; the rest are hop-by-hop or would change how the body is encoded.
const UNFORWARDED_HEADERS: &[&str] = &[
    "host",
    "accept-encoding",
    "connection",
    "content-length",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Result of a fetch attempt
#[derive(Debug)]
pub struct FetchOutcome {
    /// Entry built from this attempt, persisted or not
    pub entry: CacheEntry,
    /// Why the attempt did not produce a 200
    pub error: Option<ProxyError>,
    /// Whether `entry` was written to the store
    pub persisted: bool,
}

/// HTTP client that fetches origins and records the result
pub struct OriginFetcher {
    client: Client,
    store: Arc<CacheStore>,
}

impl OriginFetcher {
    pub fn new(
        store: Arc<CacheStore>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(store, client))
    }

    /// Use a preconfigured client
    pub fn with_client(store: Arc<CacheStore>, client: Client) -> Self {
        Self { client, store }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Fetch `url` and persist the outcome.
    ///
    /// Without `headers_override` the request headers of the stored entry are
    /// reused. A 200 always overwrites the stored entry; anything else is
    /// written only when nothing is stored yet.
    pub async fn fetch_and_store(
        &self,
        url: &str,
        headers_override: Option<Headers>,
    ) -> FetchOutcome {
        let headers = match headers_override {
            Some(headers) => headers,
            None => self.stored_request_headers(url).await,
        };
        let headers = normalize_request_headers(headers);

        let result = self.fetch(url, &headers).await;
        let (entry, error) = match result {
            Ok(entry) if entry.is_ok() => (entry, None),
            Ok(entry) => {
                let err = ProxyError::Upstream(entry.status_code);
                error!(url = %url, status = entry.status_code, "Failed to fetch origin");
                (entry, Some(err))
            }
            Err(err) => {
                error!(url = %url, error = %err, "Error fetching origin");
                (failure_entry(url, headers, &err), Some(err))
            }
        };

        let persisted = self.persist(&entry).await;
        FetchOutcome {
            entry,
            error,
            persisted,
        }
    }

    async fn fetch(&self, url: &str, headers: &Headers) -> Result<CacheEntry> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ProxyError::InvalidUrl(url.to_string()));
        }

        debug!(url = %url, "Fetching origin");
        let response = self
            .client
            .get(url)
            .headers(to_header_map(headers))
            .send()
            .await?;

        let status_code = response.status().as_u16();
        let response_headers = headers_from_map(response.headers());
        let body = response.text().await?;

        Ok(CacheEntry {
            url: url.to_string(),
            request_headers: headers.clone(),
            response_headers,
            status_code,
            body,
            fetched_at: Some(Utc::now()),
        })
    }

    async fn persist(&self, entry: &CacheEntry) -> bool {
        let result = if entry.is_ok() {
            self.store.store(entry).await.map(|()| true)
        } else {
            self.store.store_if_absent(entry).await
        };

        match result {
            Ok(true) if entry.is_ok() => {
                info!(url = %entry.url, status = entry.status_code, "Cached");
                true
            }
            Ok(true) => {
                info!(url = %entry.url, status = entry.status_code, "Cached error");
                true
            }
            Ok(false) => {
                debug!(url = %entry.url, status = entry.status_code, "Kept existing entry");
                false
            }
            Err(e) => {
                let err = ProxyError::CachePersist(e);
                warn!(url = %entry.url, error = %err, "Serving unpersisted entry");
                false
            }
        }
    }

    async fn stored_request_headers(&self, url: &str) -> Headers {
        match self.store.try_load(url).await {
            Ok(Some(entry)) => entry.request_headers,
            Ok(None) => Headers::new(),
            Err(e) => {
                warn!(url = %url, error = %ProxyError::CacheRead(e), "Refreshing without stored headers");
                Headers::new()
            }
        }
    }
}

/// Entry recorded when no origin response was obtained
fn failure_entry(url: &str, request_headers: Headers, err: &ProxyError) -> CacheEntry {
    CacheEntry {
        url: url.to_string(),
        request_headers,
        response_headers: Headers::new(),
        status_code: err.synthetic_status(),
        body: err.to_string(),
        fetched_at: Some(Utc::now()),
    }
}

/// Lowercase names, drop unforwarded headers, ensure a User-Agent
pub fn normalize_request_headers(headers: Headers) -> Headers {
    let mut normalized: Headers = headers
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .filter(|(name, _)| !UNFORWARDED_HEADERS.contains(&name.as_str()))
        .collect();

    normalized
        .entry(USER_AGENT.as_str().to_string())
        .or_insert_with(|| DEFAULT_USER_AGENT.to_string());
    normalized
}

/// Flatten an HTTP header map, joining repeated values with ", "
pub fn headers_from_map(map: &HeaderMap) -> Headers {
    map.keys()
        .map(|name| {
            let value = map
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            (name.as_str().to_string(), value)
        })
        .collect()
}

fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => debug!(header = %name, "Dropping unrepresentable request header"),
        }
    }
    map
}
