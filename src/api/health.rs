//! Shared health state for the /health endpoint.
//! Updated by ScanSweeper after each batch.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

#[derive(Default)]
pub struct HealthState {
    /// Unix millis of the last completed sweep (0 = none yet).
    last_sweep_at_ms: AtomicI64,
    last_sweep_shops: AtomicU64,
    last_sweep_failures: AtomicU64,
    sweeps_total: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sweep(&self, at: DateTime<Utc>, shops: usize, failures: usize) {
        self.last_sweep_at_ms.store(at.timestamp_millis(), Ordering::Relaxed);
        self.last_sweep_shops.store(shops as u64, Ordering::Relaxed);
        self.last_sweep_failures.store(failures as u64, Ordering::Relaxed);
        self.sweeps_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_sweep_at(&self) -> Option<DateTime<Utc>> {
        match self.last_sweep_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn last_sweep_shops(&self) -> u64 {
        self.last_sweep_shops.load(Ordering::Relaxed)
    }

    pub fn last_sweep_failures(&self) -> u64 {
        self.last_sweep_failures.load(Ordering::Relaxed)
    }

    pub fn sweeps_total(&self) -> u64 {
        self.sweeps_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sweep_bookkeeping() {
        let health = HealthState::new();
        assert_eq!(health.last_sweep_at(), None);

        let at = Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap();
        health.record_sweep(at, 4, 1);
        health.record_sweep(at, 3, 0);
        assert_eq!(health.last_sweep_at(), Some(at));
        assert_eq!(health.last_sweep_shops(), 3);
        assert_eq!(health.last_sweep_failures(), 0);
        assert_eq!(health.sweeps_total(), 2);
    }
}
