//! In-memory histogram of end-to-end scan durations.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

/// Shared scan latency stats. The engine records, the API reads.
/// Values stored in milliseconds, 1ms to 1h at 3 significant figures.
pub struct ScanLatency {
    inner: Mutex<Option<Histogram<u64>>>,
}

impl ScanLatency {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Histogram::new_with_bounds(1, 3_600_000, 3).ok()),
        }
    }

    pub fn record(&self, d: Duration) {
        let ms = d.as_millis().clamp(1, 3_600_000) as u64;
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(h) = guard.as_mut() {
                let _ = h.record(ms);
            }
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let empty = LatencySnapshot {
            samples: 0,
            p50_ms: None,
            p95_ms: None,
            p99_ms: None,
            max_ms: None,
        };
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

impl Default for ScanLatency {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_percentiles() {
        let stats = ScanLatency::new();
        let snap = stats.snapshot();
        assert_eq!(snap.samples, 0);
        assert_eq!(snap.p50_ms, None);
    }

    #[test]
    fn records_durations_in_millis() {
        let stats = ScanLatency::new();
        for ms in [100u64, 200, 300, 400, 5_000] {
            stats.record(Duration::from_millis(ms));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.samples, 5);
        assert_eq!(snap.p50_ms, Some(300));
        assert!(snap.max_ms.unwrap() >= 4_990);
        // sub-millisecond scans still count
        stats.record(Duration::from_micros(10));
        assert_eq!(stats.snapshot().samples, 6);
    }
}
