use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Atomic counters updated on every cache operation.
///
/// Recording is gated: a cache built without `record_stats()` pays one
/// branch per event and nothing else.
pub(crate) struct StatsCounter {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    load_success: AtomicU64,
    load_failure: AtomicU64,
    total_load_nanos: AtomicU64,
    evictions: AtomicU64,
    eviction_weight: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn new(enabled: bool) -> Self {
        StatsCounter {
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            load_success: AtomicU64::new(0),
            load_failure: AtomicU64::new(0),
            total_load_nanos: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            eviction_weight: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_hit(&self) {
        if self.enabled {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_miss(&self) {
        if self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_load_success(&self, elapsed: Duration) {
        if self.enabled {
            self.load_success.fetch_add(1, Ordering::Relaxed);
            self.total_load_nanos
                .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_load_failure(&self, elapsed: Duration) {
        if self.enabled {
            self.load_failure.fetch_add(1, Ordering::Relaxed);
            self.total_load_nanos
                .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_eviction(&self, weight: u64) {
        if self.enabled {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            self.eviction_weight.fetch_add(weight, Ordering::Relaxed);
        }
    }

    /// Returns a point-in-time snapshot of the statistics.
    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            load_success: self.load_success.load(Ordering::Relaxed),
            load_failure: self.load_failure.load(Ordering::Relaxed),
            total_load_nanos: self.total_load_nanos.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            eviction_weight: self.eviction_weight.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of cache statistics.
///
/// Counters are monotonic and best-effort: concurrent readers may observe
/// counts that are instantaneously out of sync with each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing (or an expired/collected entry).
    pub misses: u64,
    /// Loads that produced a value.
    pub load_success: u64,
    /// Loads that failed or panicked.
    pub load_failure: u64,
    /// Total nanoseconds spent inside loaders, successful or not.
    pub total_load_nanos: u64,
    /// Entries evicted by the size policy.
    pub evictions: u64,
    /// Total weight released by size evictions.
    pub eviction_weight: u64,
}

impl CacheStats {
    pub fn request_count(&self) -> u64 {
        self.hits + self.misses
    }

    /// `hits / (hits + misses)`, or 0.0 before any request.
    pub fn hit_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// `misses / (hits + misses)`, or 0.0 before any request.
    pub fn miss_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 {
            0.0
        } else {
            self.misses as f64 / total as f64
        }
    }

    /// Mean nanoseconds per load, or 0.0 before any load.
    pub fn average_load_penalty(&self) -> f64 {
        let loads = self.load_success + self.load_failure;
        if loads == 0 {
            0.0
        } else {
            self.total_load_nanos as f64 / loads as f64
        }
    }
}
