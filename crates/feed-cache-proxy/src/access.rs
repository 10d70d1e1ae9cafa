//! Last-access bookkeeping for eviction decisions

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Process-wide map from URL to the time of its last inbound request
#[derive(Clone, Default)]
pub struct AccessTracker {
    last_access: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl AccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request for `url` now
    pub async fn touch(&self, url: &str) {
        let mut map = self.last_access.write().await;
        map.insert(url.to_string(), Utc::now());
    }

    /// Record now for `url` only if nothing is recorded yet; true when inserted
    pub async fn mark_if_absent(&self, url: &str) -> bool {
        let mut map = self.last_access.write().await;
        if map.contains_key(url) {
            return false;
        }
        map.insert(url.to_string(), Utc::now());
        true
    }

    pub async fn last_access(&self, url: &str) -> Option<DateTime<Utc>> {
        self.last_access.read().await.get(url).copied()
    }

    /// Whether `url` has a record older than `max_idle`. Unknown URLs are not idle.
    pub async fn is_idle(&self, url: &str, max_idle: Duration) -> bool {
        self.last_access(url)
            .await
            .is_some_and(|last| idle_since(last, max_idle))
    }

    /// Drop the record of `url` if it is idle, checked under the same lock
    /// as the removal. Returns whether it was dropped.
    pub async fn forget_if_idle(&self, url: &str, max_idle: Duration) -> bool {
        let mut map = self.last_access.write().await;
        if !map.get(url).is_some_and(|last| idle_since(*last, max_idle)) {
            return false;
        }
        map.remove(url);
        true
    }

    pub async fn len(&self) -> usize {
        self.last_access.read().await.len()
    }
}

fn idle_since(last: DateTime<Utc>, max_idle: Duration) -> bool {
    let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
    Utc::now().signed_duration_since(last) > max_idle
}
