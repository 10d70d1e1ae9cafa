//! Loopback origin server for fetcher, scheduler and server tests

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct OriginState {
    reply: Mutex<(u16, String)>,
    last_headers: Mutex<Option<HeaderMap>>,
    hits: AtomicUsize,
    error_hits: AtomicUsize,
}

/// A controllable origin serving `/feed`
#[derive(Clone)]
pub struct TestOrigin {
    state: Arc<OriginState>,
    base_url: String,
}

impl TestOrigin {
    pub async fn start(status: u16, body: &str) -> Self {
        let state = Arc::new(OriginState::default());
        *state.reply.lock().unwrap() = (status, body.to_string());

        let router = Router::new()
            .route("/feed", get(serve_feed))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            state,
            base_url: format!("http://{}", addr),
        }
    }

    pub fn feed_url(&self) -> String {
        format!("{}/feed", self.base_url)
    }

    pub fn reply_with(&self, status: u16, body: &str) {
        *self.state.reply.lock().unwrap() = (status, body.to_string());
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn error_hits(&self) -> usize {
        self.state.error_hits.load(Ordering::SeqCst)
    }

    pub fn last_header(&self, name: &str) -> Option<String> {
        self.state
            .last_headers
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|headers| headers.get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

async fn serve_feed(State(state): State<Arc<OriginState>>, headers: HeaderMap) -> Response {
    *state.last_headers.lock().unwrap() = Some(headers);
    let (status, body) = state.reply.lock().unwrap().clone();

    state.hits.fetch_add(1, Ordering::SeqCst);
    if status != 200 {
        state.error_hits.fetch_add(1, Ordering::SeqCst);
    }

    (
        StatusCode::from_u16(status).unwrap(),
        [
            ("content-type", "application/rss+xml"),
            ("cache-control", "max-age=60"),
            ("set-cookie", "session=abc"),
            ("x-origin", "test"),
        ],
        body,
    )
        .into_response()
}

/// Origin client that ignores proxy settings from the environment
pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .connect_timeout(Duration::from_secs(1))
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// URL on a port nothing listens on
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/feed", addr)
}

/// Poll `check` until it holds or five seconds pass
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
