//! Error types for the cache store

use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum StoreError {
    Io(Box<std::io::Error>),
    Parse(serde_json::Error),
    Timeout(Duration),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "IO error: {}", err),
            StoreError::Parse(err) => write!(f, "Malformed cache entry: {}", err),
            StoreError::Timeout(limit) => {
                write!(f, "Cache I/O timed out after {} ms", limit.as_millis())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err.as_ref()),
            StoreError::Parse(err) => Some(err),
            StoreError::Timeout(_) => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Parse(err)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
