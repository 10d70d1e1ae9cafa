//! Core types for the feed cache proxy

use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    /// URLs with a live background refresh cycle
    pub refresh_tasks: usize,
    /// URLs with a recorded inbound request
    pub tracked_urls: usize,
}
