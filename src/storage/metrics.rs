//! Operational counters for the cache store.
//!
//! Counters reset when the rolling window elapses; the reset happens lazily
//! on the next increment or snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Counter selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Hit,
    Miss,
    Write,
    SkippedWrite,
    Error,
    Fresh,
    Stale,
    Expired,
    Invalidated,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    skipped_writes: AtomicU64,
    errors: AtomicU64,
    fresh: AtomicU64,
    stale: AtomicU64,
    expired: AtomicU64,
    invalidated: AtomicU64,
}

impl Counters {
    fn get(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Hit => &self.hits,
            Counter::Miss => &self.misses,
            Counter::Write => &self.writes,
            Counter::SkippedWrite => &self.skipped_writes,
            Counter::Error => &self.errors,
            Counter::Fresh => &self.fresh,
            Counter::Stale => &self.stale,
            Counter::Expired => &self.expired,
            Counter::Invalidated => &self.invalidated,
        }
    }

    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.writes,
            &self.skipped_writes,
            &self.errors,
            &self.fresh,
            &self.stale,
            &self.expired,
            &self.invalidated,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Hit/miss/write/error counters plus freshness buckets.
#[derive(Debug)]
pub struct CacheMetrics {
    counters: Counters,
    window: Mutex<Window>,
    window_len: Duration,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub skipped_writes: u64,
    pub errors: u64,
    pub fresh: u64,
    pub stale: u64,
    pub expired: u64,
    pub invalidated: u64,
    pub hit_rate: f64,
    pub window_started_at: DateTime<Utc>,
}

impl CacheMetrics {
    pub fn new(window_len: Duration) -> Self {
        Self {
            counters: Counters::default(),
            window: Mutex::new(Window {
                started: Instant::now(),
                started_at: Utc::now(),
            }),
            window_len,
        }
    }

    /// Increment one counter.
    pub fn incr(&self, counter: Counter) {
        self.roll();
        self.counters.get(counter).fetch_add(1, Ordering::Relaxed);
    }

    /// Read one counter.
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters.get(counter).load(Ordering::Relaxed)
    }

    /// Zero all counters and start a new window.
    pub fn reset(&self) {
        let mut window = self.window.lock();
        self.counters.reset();
        window.started = Instant::now();
        window.started_at = Utc::now();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.roll();
        let hits = self.get(Counter::Hit);
        let misses = self.get(Counter::Miss);
        let lookups = hits + misses;
        MetricsSnapshot {
            hits,
            misses,
            writes: self.get(Counter::Write),
            skipped_writes: self.get(Counter::SkippedWrite),
            errors: self.get(Counter::Error),
            fresh: self.get(Counter::Fresh),
            stale: self.get(Counter::Stale),
            expired: self.get(Counter::Expired),
            invalidated: self.get(Counter::Invalidated),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            window_started_at: self.window.lock().started_at,
        }
    }

    fn roll(&self) {
        let mut window = self.window.lock();
        if window.started.elapsed() >= self.window_len {
            self.counters.reset();
            window.started = Instant::now();
            window.started_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_snapshot() {
        let metrics = CacheMetrics::new(Duration::from_secs(3600));
        metrics.incr(Counter::Hit);
        metrics.incr(Counter::Hit);
        metrics.incr(Counter::Hit);
        metrics.incr(Counter::Miss);

        let snap = metrics.snapshot();
        assert_eq!(snap.hits, 3);
        assert_eq!(snap.misses, 1);
        assert!((snap.hit_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_window_rolls_over() {
        let metrics = CacheMetrics::new(Duration::ZERO);
        metrics.incr(Counter::Error);
        // Zero-length window: every access starts a new one
        assert_eq!(metrics.snapshot().errors, 0);
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new(Duration::from_secs(3600));
        metrics.incr(Counter::Write);
        metrics.reset();
        assert_eq!(metrics.get(Counter::Write), 0);
    }
}
