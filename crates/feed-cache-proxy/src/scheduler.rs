//! Background refresh and eviction, one task per cached URL
//!
//! Each task sleeps for the TTL, then decides what to do with its URL:
//!
//! - no recorded access yet: record a baseline and sleep again
//! - idle longer than `max_idle`: delete the entry and stop
//! - otherwise: refetch from the origin with the stored request headers
//!
//! The registry keeps at most one live task per URL.

use crate::access::AccessTracker;
use crate::fetcher::OriginFetcher;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct TaskSlot {
    /// Generation of the task, so a finished task only deregisters itself
    id: u64,
    handle: JoinHandle<()>,
}

enum Wake {
    Baseline,
    Refetch,
    Evict,
}

struct SchedulerInner {
    fetcher: Arc<OriginFetcher>,
    access: AccessTracker,
    ttl: Duration,
    max_idle: Duration,
    tasks: Mutex<HashMap<String, TaskSlot>>,
    next_id: AtomicU64,
}

/// Registry and driver of per-URL refresh tasks
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
}

impl RefreshScheduler {
    pub fn new(
        fetcher: Arc<OriginFetcher>,
        access: AccessTracker,
        ttl: Duration,
        max_idle: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                fetcher,
                access,
                ttl,
                max_idle,
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Start a refresh task for `url` unless one is already running.
    /// Returns true when a task was spawned.
    pub async fn ensure_running(&self, url: &str) -> bool {
        let mut tasks = self.inner.tasks.lock().await;
        if tasks.get(url).is_some_and(|slot| !slot.handle.is_finished()) {
            return false;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(self.inner.clone().run(url.to_string(), id));
        tasks.insert(url.to_string(), TaskSlot { id, handle });
        true
    }

    pub async fn is_active(&self, url: &str) -> bool {
        let tasks = self.inner.tasks.lock().await;
        tasks.get(url).is_some_and(|slot| !slot.handle.is_finished())
    }

    pub async fn active_tasks(&self) -> usize {
        let tasks = self.inner.tasks.lock().await;
        tasks.values().filter(|slot| !slot.handle.is_finished()).count()
    }
}

impl SchedulerInner {
    async fn run(self: Arc<Self>, url: String, id: u64) {
        info!(url = %url, ttl_secs = self.ttl.as_secs(), "Refreshing cache periodically");

        loop {
            tokio::time::sleep(self.ttl).await;

            match self.check(&url).await {
                Wake::Baseline => debug!(url = %url, "Recorded baseline access"),
                Wake::Refetch => self.refetch(&url).await,
                Wake::Evict => {
                    if self.evict(&url, id).await {
                        return;
                    }
                    self.refetch(&url).await;
                }
            }
        }
    }

    async fn check(&self, url: &str) -> Wake {
        if self.access.mark_if_absent(url).await {
            return Wake::Baseline;
        }
        if self.access.is_idle(url, self.max_idle).await {
            Wake::Evict
        } else {
            Wake::Refetch
        }
    }

    async fn refetch(&self, url: &str) {
        info!(url = %url, "Refresh cache");
        let outcome = self.fetcher.fetch_and_store(url, None).await;
        debug!(
            url = %url,
            status = outcome.entry.status_code,
            persisted = outcome.persisted,
            "Refresh finished"
        );
    }

    /// Remove the entry and deregister. Returns false when the URL was
    /// requested again since the idle check, in which case nothing changes.
    async fn evict(&self, url: &str, id: u64) -> bool {
        let mut tasks = self.tasks.lock().await;
        if !self.access.forget_if_idle(url, self.max_idle).await {
            return false;
        }

        match self.fetcher.store().remove(url).await {
            Ok(_) => warn!(url = %url, "Removed from cached files"),
            Err(e) => warn!(url = %url, error = %e, "Failed to remove idle entry"),
        }

        if tasks.get(url).is_some_and(|slot| slot.id == id) {
            tasks.remove(url);
        }
        true
    }
}
