//! Cache statistics tracking
//!
//! Counters cover the current process only, whether a hit was served from
//! audio stored this session or by an earlier one.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Statistics for cache performance tracking
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
    time_saved_ms: AtomicU64,
}

/// Point-in-time copy of the statistics plus store occupancy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Lookups answered from the store
    pub hits: u64,
    /// Lookups that fell through to synthesis
    pub misses: u64,
    /// Hit share of all lookups, 0 to 100, one decimal
    pub hit_rate_percent: f64,
    /// Synthesis time avoided by hits
    pub estimated_time_saved_ms: u64,
    /// Bytes of audio currently stored
    pub current_bytes: u64,
    /// Entries currently stored
    pub entry_count: usize,
    /// Entries written this session
    pub stores: u64,
    /// Entries evicted this session
    pub evictions: u64,
}

impl StatsSnapshot {
    /// Saved time in seconds, one decimal
    pub fn estimated_time_saved_secs(&self) -> f64 {
        (self.estimated_time_saved_ms as f64 / 100.0).round() / 10.0
    }
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hit that spared a synthesis of `estimated_generation_cost_ms`
    pub fn record_hit(&self, estimated_generation_cost_ms: u64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.time_saved_ms
            .fetch_add(estimated_generation_cost_ms, Ordering::Relaxed);
    }

    /// Record a cache miss
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a newly stored entry
    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    /// Record evicted entries
    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get total hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get total stores
    pub fn stores(&self) -> u64 {
        self.stores.load(Ordering::Relaxed)
    }

    /// Get total evictions
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get estimated synthesis time saved
    pub fn time_saved_ms(&self) -> u64 {
        self.time_saved_ms.load(Ordering::Relaxed)
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Copy the counters, adding the store occupancy supplied by the caller
    pub fn snapshot(&self, current_bytes: u64, entry_count: usize) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_rate_percent: (self.hit_ratio() * 1000.0).round() / 10.0,
            estimated_time_saved_ms: self.time_saved_ms(),
            current_bytes,
            entry_count,
            stores: self.stores(),
            evictions: self.evictions(),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.stores.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.time_saved_ms.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = CacheStats::new();

        stats.record_hit(950);
        stats.record_hit(950);
        stats.record_miss();

        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.time_saved_ms(), 1900);
        assert_eq!(stats.hit_ratio(), 2.0 / 3.0);
    }

    #[test]
    fn test_snapshot() {
        let stats = CacheStats::new();
        stats.record_hit(950);
        stats.record_miss();
        stats.record_miss();
        stats.record_store();
        stats.record_evictions(3);

        let snap = stats.snapshot(4096, 7);
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 2);
        assert_eq!(snap.hit_rate_percent, 33.3);
        assert_eq!(snap.estimated_time_saved_ms, 950);
        assert_eq!(snap.current_bytes, 4096);
        assert_eq!(snap.entry_count, 7);
        assert_eq!(snap.stores, 1);
        assert_eq!(snap.evictions, 3);
        assert_eq!(snap.estimated_time_saved_secs(), 1.0);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = CacheStats::new().snapshot(0, 0);
        assert_eq!(snap.hit_rate_percent, 0.0);
    }

    #[test]
    fn test_stats_reset() {
        let stats = CacheStats::new();

        stats.record_hit(950);
        stats.record_miss();
        stats.reset();

        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.time_saved_ms(), 0);
        assert_eq!(stats.hit_ratio(), 0.0);
    }
}
