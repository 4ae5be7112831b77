//! Shared health state for the /health endpoint.
//! Updated by the upload handler, read by the API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-level counters. Everything here is advisory.
pub struct HealthState {
    started_at: Instant,
    uploads_processed: AtomicU64,
    upload_failures: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            uploads_processed: AtomicU64::new(0),
            upload_failures: AtomicU64::new(0),
        }
    }

    pub fn record_upload(&self, ok: bool) {
        let counter = if ok { &self.uploads_processed } else { &self.upload_failures };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn uploads_processed(&self) -> u64 {
        self.uploads_processed.load(Ordering::Relaxed)
    }

    pub fn upload_failures(&self) -> u64 {
        self.upload_failures.load(Ordering::Relaxed)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
