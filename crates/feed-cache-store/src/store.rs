//! File-based entry storage, one JSON file per URL

use crate::error::{Result, StoreError};
use crate::types::{CacheEntry, CacheKey, ENTRY_EXTENSION};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_STRIPES: usize = 64;
const TMP_MARKER: &str = ".tmp-";

/// Persisted cache entries keyed by URL digest
pub struct CacheStore {
    /// Directory holding one `<key>.json` file per URL
    cache_dir: PathBuf,
    /// Upper bound for any single file operation
    io_timeout: Duration,
    /// Serializes writers of the same key
    write_locks: [Mutex<()>; LOCK_STRIPES],
    /// Suffix source for temporary file names
    tmp_counter: AtomicU64,
}

impl CacheStore {
    /// Create a store rooted at `cache_dir`
    pub fn new(cache_dir: PathBuf) -> Self {
        Self::with_io_timeout(cache_dir, DEFAULT_IO_TIMEOUT)
    }

    pub fn with_io_timeout(cache_dir: PathBuf, io_timeout: Duration) -> Self {
        Self {
            cache_dir,
            io_timeout,
            write_locks: std::array::from_fn(|_| Mutex::new(())),
            tmp_counter: AtomicU64::new(0),
        }
    }

    /// Ensure the cache directory exists and drop leftovers of interrupted writes
    pub async fn init(&self) -> Result<()> {
        self.bounded(fs::create_dir_all(&self.cache_dir)).await?;

        let mut dir = self.bounded(fs::read_dir(&self.cache_dir)).await?;
        let mut removed = 0usize;
        while let Some(item) = self.bounded(dir.next_entry()).await? {
            let name = item.file_name();
            if name.to_string_lossy().contains(TMP_MARKER) {
                if let Err(e) = self.bounded(fs::remove_file(item.path())).await {
                    warn!(file = ?item.path(), error = %e, "Failed to remove stale temp file");
                } else {
                    removed += 1;
                }
            }
        }

        info!(cache_dir = ?self.cache_dir, removed_temp_files = removed, "Cache initialized");
        Ok(())
    }

    /// Key for a raw URL string
    pub fn key_for(url: &str) -> CacheKey {
        CacheKey::for_url(url)
    }

    /// Path of the entry file for `url`
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.cache_dir.join(Self::key_for(url).file_name())
    }

    /// Load the entry for `url`; unreadable or malformed files count as a miss
    pub async fn load(&self, url: &str) -> Option<CacheEntry> {
        match self.try_load(url).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read cache entry, treating as miss");
                None
            }
        }
    }

    /// Load the entry for `url`, surfacing read and parse failures
    pub async fn try_load(&self, url: &str) -> Result<Option<CacheEntry>> {
        self.read_entry(&self.path_for(url)).await
    }

    /// Whether a well-formed entry exists for `url`
    pub async fn contains(&self, url: &str) -> bool {
        matches!(self.try_load(url).await, Ok(Some(_)))
    }

    /// Write `entry`, replacing whatever is stored for its URL
    pub async fn store(&self, entry: &CacheEntry) -> Result<()> {
        let key = entry.key();
        let _guard = self.lock_for(&key).lock().await;
        self.write_atomic(&key, entry).await?;
        debug!(url = %entry.url, key = %key, status = entry.status_code, "Stored cache entry");
        Ok(())
    }

    /// Write `entry` only when no well-formed entry exists for its URL.
    ///
    /// Returns whether the entry was written. A corrupt file does not count
    /// as an existing entry and gets replaced.
    pub async fn store_if_absent(&self, entry: &CacheEntry) -> Result<bool> {
        let key = entry.key();
        let _guard = self.lock_for(&key).lock().await;

        let path = self.cache_dir.join(key.file_name());
        match self.read_entry(&path).await {
            Ok(Some(_)) => return Ok(false),
            Ok(None) | Err(StoreError::Parse(_)) => {}
            Err(e) => return Err(e),
        }

        self.write_atomic(&key, entry).await?;
        debug!(url = %entry.url, key = %key, status = entry.status_code, "Stored first cache entry");
        Ok(true)
    }

    /// Delete the entry for `url`; returns false when nothing was stored
    pub async fn remove(&self, url: &str) -> Result<bool> {
        let key = Self::key_for(url);
        let _guard = self.lock_for(&key).lock().await;

        match self.bounded(fs::remove_file(self.cache_dir.join(key.file_name()))).await {
            Ok(()) => Ok(true),
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// URLs of every persisted entry, in directory order.
    ///
    /// A well-formed entry whose file name is not its URL's key gets renamed
    /// to that key, or skipped when a well-formed file already holds it.
    pub async fn list_all(&self) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        let mut seen = HashSet::new();
        let mut dir = self.bounded(fs::read_dir(&self.cache_dir)).await?;

        while let Some(item) = self.bounded(dir.next_entry()).await? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }

            match self.read_entry(&path).await {
                Ok(Some(entry)) if !entry.url.is_empty() => {
                    if self.adopt(&path, &entry).await && seen.insert(entry.url.clone()) {
                        debug!(url = %entry.url, file = ?path, "Found cached URL");
                        urls.push(entry.url);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(file = ?path, error = %e, "Skipping unreadable cache file"),
            }
        }

        Ok(urls)
    }

    /// Make sure `entry`, read from `path`, sits under its URL's key
    async fn adopt(&self, path: &Path, entry: &CacheEntry) -> bool {
        let key = entry.key();
        if path.file_stem().and_then(|stem| stem.to_str()) == Some(key.to_hex().as_str()) {
            return true;
        }

        let _guard = self.lock_for(&key).lock().await;
        let target = self.cache_dir.join(key.file_name());
        match self.read_entry(&target).await {
            Ok(Some(_)) => {
                warn!(file = ?path, url = %entry.url, "Skipping misnamed cache file, entry exists");
                return false;
            }
            Ok(None) | Err(StoreError::Parse(_)) => {}
            Err(e) => {
                warn!(file = ?path, error = %e, "Skipping misnamed cache file");
                return false;
            }
        }

        match self.bounded(fs::rename(path, &target)).await {
            Ok(()) => {
                info!(from = ?path, to = ?target, url = %entry.url, "Renamed misnamed cache file");
                true
            }
            Err(e) => {
                warn!(file = ?path, error = %e, "Failed to rename misnamed cache file");
                false
            }
        }
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<CacheEntry>> {
        match self.bounded(fs::read(path)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write to a temp file, then rename it over the target
    async fn write_atomic(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        let data = serde_json::to_vec_pretty(entry)?;
        let target = self.cache_dir.join(key.file_name());
        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .cache_dir
            .join(format!("{}{}{}-{}", key, TMP_MARKER, std::process::id(), seq));

        self.bounded(fs::write(&tmp, &data)).await?;
        if let Err(e) = self.bounded(fs::rename(&tmp, &target)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    fn lock_for(&self, key: &CacheKey) -> &Mutex<()> {
        &self.write_locks[key.first_byte() as usize % LOCK_STRIPES]
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        match tokio::time::timeout(self.io_timeout, op).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.io_timeout)),
        }
    }
}
