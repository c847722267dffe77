//! Operation Metrics Module
//!
//! Opt-in counters describing how a [`ConcurrentMap`](crate::map::ConcurrentMap)
//! is being used: hit rates, how often conditional inserts lose to an existing
//! key, and how much work the lazy insertion paths throw away or serialize.
//!
//! Collection is disabled by default. While disabled every recording call is a
//! single relaxed load.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Snapshot of the counters collected for one map
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapMetrics {
    /// Number of `get`/`contains` calls
    pub lookups: u64,
    /// Lookups that found the key
    pub hits: u64,
    /// Lookups that did not find the key
    pub misses: u64,
    /// Entries written, including overwrites
    pub insertions: u64,
    /// Conditional inserts that found the key already present
    pub rejected_insertions: u64,
    /// Values computed outside the lock and then dropped because another
    /// writer committed first
    pub discarded_computations: u64,
    /// Values computed while holding the write lock
    pub locked_computations: u64,
    /// Longest time a single computation held the write lock, in nanoseconds
    pub max_locked_compute_ns: u64,
}

impl MapMetrics {
    /// Percentage of lookups that found their key
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            (self.hits as f64 / self.lookups as f64) * 100.0
        }
    }

    /// Percentage of unlocked computations whose result was discarded
    ///
    /// A high value means callers race on the same missing keys and would
    /// waste less work with the `*_func_lock` variants.
    pub fn discard_rate(&self) -> f64 {
        let attempts = self.insertions + self.discarded_computations;
        if attempts == 0 {
            0.0
        } else {
            (self.discarded_computations as f64 / attempts as f64) * 100.0
        }
    }

    /// Longest write-lock hold caused by a caller-supplied computation
    pub fn max_locked_compute_time(&self) -> Duration {
        Duration::from_nanos(self.max_locked_compute_ns)
    }
}

/// Internal atomic counters backing [`MapMetrics`]
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    enabled: AtomicBool,
    lookups: AtomicU64,
    hits: AtomicU64,
    insertions: AtomicU64,
    rejected_insertions: AtomicU64,
    discarded_computations: AtomicU64,
    locked_computations: AtomicU64,
    max_locked_compute_ns: AtomicU64,
}

impl AtomicMetrics {
    /// Whether recording calls currently have any effect
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn collection on or off; existing counts are kept
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Record a lookup and whether it found its key
    #[inline]
    pub fn record_lookup(&self, hit: bool) {
        if !self.is_enabled() {
            return;
        }
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record `count` entries written
    #[inline]
    pub fn record_insertions(&self, count: u64) {
        if self.is_enabled() {
            self.insertions.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Record the outcome of a conditional insert
    #[inline]
    pub fn record_conditional(&self, inserted: bool) {
        if !self.is_enabled() {
            return;
        }
        if inserted {
            self.insertions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_insertions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a computed value that lost the race to another writer
    #[inline]
    pub fn record_discard(&self) {
        if self.is_enabled() {
            self.discarded_computations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Start timing a computation; `None` while collection is disabled
    #[inline]
    pub fn start_timer(&self) -> Option<Instant> {
        if self.is_enabled() {
            Some(Instant::now())
        } else {
            None
        }
    }

    /// Record a computation that ran under the write lock
    pub fn record_locked_compute(&self, started: Option<Instant>) {
        let Some(started) = started else {
            return;
        };
        let duration_ns = started.elapsed().as_nanos() as u64;
        self.locked_computations.fetch_add(1, Ordering::Relaxed);

        let mut current_max = self.max_locked_compute_ns.load(Ordering::Relaxed);
        while duration_ns > current_max {
            match self.max_locked_compute_ns.compare_exchange_weak(
                current_max,
                duration_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MapMetrics {
        let lookups = self.lookups.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);

        MapMetrics {
            lookups,
            hits,
            misses: lookups.saturating_sub(hits),
            insertions: self.insertions.load(Ordering::Relaxed),
            rejected_insertions: self.rejected_insertions.load(Ordering::Relaxed),
            discarded_computations: self.discarded_computations.load(Ordering::Relaxed),
            locked_computations: self.locked_computations.load(Ordering::Relaxed),
            max_locked_compute_ns: self.max_locked_compute_ns.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters, leaving the enabled flag untouched
    pub fn reset(&self) {
        self.lookups.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.insertions.store(0, Ordering::Relaxed);
        self.rejected_insertions.store(0, Ordering::Relaxed);
        self.discarded_computations.store(0, Ordering::Relaxed);
        self.locked_computations.store(0, Ordering::Relaxed);
        self.max_locked_compute_ns.store(0, Ordering::Relaxed);
    }
}

/// Trait for data structures that support performance metrics
pub trait MetricsCollector {
    /// Get current metrics
    fn metrics(&self) -> MapMetrics;

    /// Reset all metrics
    fn reset_metrics(&self);

    /// Enable or disable metrics collection
    fn set_metrics_enabled(&self, enabled: bool);

    /// Check if metrics collection is enabled
    fn is_metrics_enabled(&self) -> bool;
}
