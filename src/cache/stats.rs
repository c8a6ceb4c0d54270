//! Cache Statistics Module
//!
//! Tracks reads, expirations, evictions and garbage collection.

use serde::Serialize;

// == Cache Stats ==
/// Counters for one locker instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads that returned a live item
    pub hits: u64,
    /// Reads that found nothing, expired reads included
    pub misses: u64,
    /// Reads that found an expired item and deleted it
    pub expired_reads: u64,
    /// Items removed to make room for writes
    pub evictions: u64,
    /// Bytes freed by eviction
    pub bytes_evicted: u64,
    /// Completed garbage collection sweeps
    pub gc_runs: u64,
    /// Expired items removed by garbage collection
    pub gc_removed: u64,
    /// Bytes freed by garbage collection
    pub bytes_collected: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    /// An expired read is also a miss.
    pub fn record_expired_read(&mut self) {
        self.expired_reads += 1;
        self.misses += 1;
    }

    pub fn record_eviction(&mut self, items: usize, bytes: u64) {
        self.evictions += items as u64;
        self.bytes_evicted += bytes;
    }

    pub fn record_gc(&mut self, items: usize, bytes: u64) {
        self.gc_runs += 1;
        self.gc_removed += items as u64;
        self.bytes_collected += bytes;
    }
}
