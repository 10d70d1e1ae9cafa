//! File-based store for captured HTTP responses
//!
//! Each target URL maps to one pretty-printed JSON file named after a 128-bit
//! digest of the URL. Writes are atomic (temp file + rename) and serialized
//! per key, so concurrent readers never see a partial entry.

mod error;
mod store;
mod types;

pub use error::{Result, StoreError};
pub use store::CacheStore;
pub use types::{find_header, CacheEntry, CacheKey, Headers, ENTRY_EXTENSION};
