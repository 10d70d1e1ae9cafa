//! HTTP server for the proxy
//!
//! `GET /health` reports process state; every other `GET /<url>` is served
//! from the cache, fetching `<url>` from its origin on a miss.

use crate::access::AccessTracker;
use crate::error::{ProxyError, Result};
use crate::fetcher::{headers_from_map, OriginFetcher};
use crate::scheduler::RefreshScheduler;
use crate::types::HealthResponse;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use feed_cache_store::{CacheEntry, CacheStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Response headers copied from a cached entry
const FORWARDED_RESPONSE_HEADERS: [header::HeaderName; 2] =
    [header::CONTENT_TYPE, header::CACHE_CONTROL];

/// Shared state for the HTTP server
pub struct ServerState {
    pub store: Arc<CacheStore>,
    pub fetcher: Arc<OriginFetcher>,
    pub access: AccessTracker,
    pub scheduler: RefreshScheduler,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(
        fetcher: Arc<OriginFetcher>,
        access: AccessTracker,
        scheduler: RefreshScheduler,
    ) -> Self {
        Self {
            store: fetcher.store().clone(),
            fetcher,
            access,
            scheduler,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(proxy)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, host: &str, port: u16) -> Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(|e| ProxyError::Config(format!("Server error: {}", e)))?;
    info!("Serving on http://{}", listener.local_addr()?);

    axum::serve(listener, router).await?;
    Ok(())
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        refresh_tasks: state.scheduler.active_tasks().await,
        tracked_urls: state.access.len().await,
    })
}

/// Serve `GET /<url>` from the cache, fetching on a miss
async fn proxy(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let url = target_url(&uri);
    state.access.touch(url).await;

    let cached = match state.store.try_load(url).await {
        Ok(entry) => entry,
        Err(e) => {
            warn!(url = %url, error = %ProxyError::CacheRead(e), "Treating unreadable entry as miss");
            None
        }
    };

    let entry = match cached {
        Some(entry) => {
            info!(url = %url, "Serving from cache");
            entry
        }
        None => {
            info!(url = %url, "Fetching and caching");
            state
                .fetcher
                .fetch_and_store(url, Some(headers_from_map(&headers)))
                .await
                .entry
        }
    };

    state.scheduler.ensure_running(url).await;

    entry_response(entry)
}

/// Everything after the leading slashes, query included, undecoded
fn target_url(uri: &Uri) -> &str {
    let raw = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    raw.trim_start_matches('/')
}

/// Build the client response from an entry
fn entry_response(entry: CacheEntry) -> Response {
    let status =
        StatusCode::from_u16(entry.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut forwarded = HeaderMap::new();
    for name in FORWARDED_RESPONSE_HEADERS {
        if let Some(value) = entry
            .response_header(name.as_str())
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            forwarded.insert(name, value);
        }
    }
    forwarded.insert(header::CONTENT_LENGTH, HeaderValue::from(entry.body.len()));

    let mut response = Response::new(Body::from(entry.body));
    *response.status_mut() = status;
    *response.headers_mut() = forwarded;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_client, TestOrigin};
    use axum::http::Request;
    use feed_cache_store::Headers;
    use std::time::Duration;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn create_test_state(cache_dir: std::path::PathBuf) -> SharedState {
        let store = Arc::new(CacheStore::new(cache_dir));
        let fetcher = Arc::new(OriginFetcher::with_client(store, test_client()));
        let access = AccessTracker::new();
        let hour = Duration::from_secs(3600);
        let scheduler = RefreshScheduler::new(fetcher.clone(), access.clone(), hour, hour);
        Arc::new(ServerState::new(fetcher, access, scheduler))
    }

    async fn get(state: &SharedState, uri: &str) -> Response {
        create_router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn test_target_url() {
        let uri: Uri = "/http://example.test/feed?lang=en".parse().unwrap();
        assert_eq!(target_url(&uri), "http://example.test/feed?lang=en");

        let uri: Uri = "//https://example.test/a%20b".parse().unwrap();
        assert_eq!(target_url(&uri), "https://example.test/a%20b");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path().to_path_buf());

        let response = get(&state, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].as_u64().is_some());
        assert_eq!(json["refresh_tasks"], 0);
        assert_eq!(json["tracked_urls"], 0);
    }

    #[tokio::test]
    async fn test_miss_fetches_then_hit_serves_cache() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path().to_path_buf());
        let origin = TestOrigin::start(200, "A").await;
        let url = origin.feed_url();
        let path = format!("/{}", url);

        let response = get(&state, &path).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "A");
        assert_eq!(origin.hits(), 1);
        assert!(state.store.contains(&url).await);
        assert!(state.scheduler.is_active(&url).await);
        assert!(state.access.last_access(&url).await.is_some());

        origin.reply_with(200, "changed");
        let response = get(&state, &path).await;
        assert_eq!(body_string(response).await, "A");
        assert_eq!(origin.hits(), 1);
        assert_eq!(state.scheduler.active_tasks().await, 1);
    }

    #[tokio::test]
    async fn test_stored_entry_served_without_origin() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path().to_path_buf());
        let origin = TestOrigin::start(200, "origin body").await;
        let url = origin.feed_url();

        let mut response_headers = Headers::new();
        response_headers.insert("Content-Type".to_string(), "text/xml".to_string());
        state
            .store
            .store(&CacheEntry {
                url: url.clone(),
                request_headers: Headers::new(),
                response_headers,
                status_code: 200,
                body: "cached body".to_string(),
                fetched_at: None,
            })
            .await
            .unwrap();

        let response = get(&state, &format!("/{}", url)).await;
        assert_eq!(body_string(response).await, "cached body");
        assert_eq!(origin.hits(), 0);
        // A primed entry still gets a refresh cycle
        assert!(state.scheduler.is_active(&url).await);
    }

    #[tokio::test]
    async fn test_response_header_filtering() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path().to_path_buf());
        let url = "http://example.test/feed";

        let mut response_headers = Headers::new();
        response_headers.insert("Set-Cookie".to_string(), "x".to_string());
        response_headers.insert("Content-Type".to_string(), "text/xml".to_string());
        response_headers.insert("X-Custom".to_string(), "y".to_string());
        response_headers.insert("Content-Length".to_string(), "999".to_string());
        state
            .store
            .store(&CacheEntry {
                url: url.to_string(),
                request_headers: Headers::new(),
                response_headers,
                status_code: 200,
                body: "<rss>é</rss>".to_string(),
                fetched_at: None,
            })
            .await
            .unwrap();

        let response = get(&state, &format!("/{}", url)).await;
        let headers = response.headers().clone();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/xml");
        assert_eq!(
            headers.get(header::CONTENT_LENGTH).unwrap(),
            &"<rss>é</rss>".len().to_string()
        );
        assert!(headers.get(header::SET_COOKIE).is_none());
        assert!(headers.get("x-custom").is_none());
        assert!(headers.get(header::CACHE_CONTROL).is_none());
        assert_eq!(headers.len(), 2);
    }

    #[tokio::test]
    async fn test_origin_headers_filtered_on_miss() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path().to_path_buf());
        let origin = TestOrigin::start(200, "A").await;

        let response = get(&state, &format!("/{}", origin.feed_url())).await;
        let headers = response.headers();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/rss+xml");
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "max-age=60");
        assert!(headers.get(header::SET_COOKIE).is_none());
        assert!(headers.get("x-origin").is_none());
    }

    #[tokio::test]
    async fn test_unwritable_cache_still_serves_origin() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path().join("missing"));
        let origin = TestOrigin::start(200, "A").await;
        let url = origin.feed_url();

        let response = get(&state, &format!("/{}", url)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "A");
        assert!(!state.store.contains(&url).await);
    }

    #[tokio::test]
    async fn test_bind_failure_is_config_error() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path().to_path_buf());
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let result = start_server(state, "127.0.0.1", port).await;
        assert!(matches!(result, Err(ProxyError::Config(msg)) if msg.starts_with("Server error")));
    }

    #[tokio::test]
    async fn test_invalid_url_served_as_500() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path().to_path_buf());

        let response = get(&state, "/not-a-url").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "Invalid URL path: not-a-url");
    }

    #[tokio::test]
    async fn test_upstream_status_mirrored() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path().to_path_buf());
        let origin = TestOrigin::start(404, "missing").await;

        let response = get(&state, &format!("/{}", origin.feed_url())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "missing");
    }

    #[tokio::test]
    async fn test_non_get_rejected() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path().to_path_buf());

        let response = create_router(state.clone())
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/http://example.test/feed")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(state.access.len().await, 0);
    }
}
