//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::fmt;

/// Header name → value, as sent upstream or received from an origin
pub type Headers = BTreeMap<String, String>;

/// File extension of persisted entries
pub const ENTRY_EXTENSION: &str = "json";

/// MD5 digest size (128 bits)
const KEY_BYTES: usize = 16;

/// MD5 digest of a target URL, also the entry's file stem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; KEY_BYTES]);

impl CacheKey {
    /// Derive the key for a raw URL string
    pub fn for_url(url: &str) -> Self {
        let digest = Md5::digest(url.as_bytes());
        let mut bytes = [0u8; KEY_BYTES];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Lowercase hex form (32 chars)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// File name of the entry on disk
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.to_hex(), ENTRY_EXTENSION)
    }

    pub(crate) fn first_byte(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A captured origin response, one per distinct URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    #[serde(default)]
    pub request_headers: Headers,
    #[serde(default)]
    pub response_headers: Headers,
    pub status_code: u16,
    #[serde(default)]
    pub body: String,
    /// Missing in entries written by older tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn key(&self) -> CacheKey {
        CacheKey::for_url(&self.url)
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }

    /// Case-insensitive response header lookup
    pub fn response_header(&self, name: &str) -> Option<&str> {
        find_header(&self.response_headers, name)
    }
}

/// Case-insensitive lookup in a header map
pub fn find_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
