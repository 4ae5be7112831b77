//! In-memory latency histogram for quote provider calls.
//! Recorded by the refresh loop and the ad hoc market route, read by /stats/latency.

use std::sync::Mutex;
use std::time::Duration;

/// Longest recordable call (10 minutes), in milliseconds.
const MAX_TRACKABLE_MS: u64 = 600_000;

/// Shared fetch latency stats. Values stored in milliseconds.
pub struct LatencyStats {
    inner: Mutex<Option<hdrhistogram::Histogram<u64>>>,
}

/// Snapshot served by the API.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

impl LatencyStats {
    /// Tracks 1ms to 10min at 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, MAX_TRACKABLE_MS, 3).ok();
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let ms = (d.as_millis().min(u128::from(MAX_TRACKABLE_MS)) as u64).max(1);
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(h) = guard.as_mut() {
                let _ = h.record(ms);
            }
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let empty = LatencySnapshot { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None, max_ms: None };
        let Ok(guard) = self.inner.lock() else {
            return empty;
        };
        match guard.as_ref() {
            Some(h) if h.len() > 0 => LatencySnapshot {
                samples: h.len(),
                p50_ms: Some(h.value_at_quantile(0.5)),
                p95_ms: Some(h.value_at_quantile(0.95)),
                p99_ms: Some(h.value_at_quantile(0.99)),
                max_ms: Some(h.max()),
            },
            _ => empty,
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_percentiles() {
        let s = LatencyStats::new().snapshot();
        assert_eq!(s.samples, 0);
        assert_eq!(s.p50_ms, None);
    }

    #[test]
    fn sub_millisecond_calls_count_as_one() {
        let stats = LatencyStats::new();
        stats.record(Duration::from_micros(10));
        stats.record(Duration::from_millis(250));
        let s = stats.snapshot();
        assert_eq!(s.samples, 2);
        assert_eq!(s.p50_ms, Some(1));
        // hdrhistogram reports the upper edge of the bucket.
        let max = s.max_ms.unwrap();
        assert!((250..=251).contains(&max), "{max}");
    }
}
