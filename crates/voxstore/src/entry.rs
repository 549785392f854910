//! Entry metadata and the store clock

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::format::IndexRecord;
use crate::key::CacheKey;

/// Point-in-time view of one stored entry
///
/// The audio itself lives in the payload file named by `locator`;
/// `size` is always its exact byte length.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Entry identity
    pub key: CacheKey,
    /// Payload file name inside the cache directory
    pub locator: String,
    /// Audio length in bytes
    pub size: u64,
    /// Creation stamp (µs since UNIX epoch)
    pub created_at: u64,
    /// Last access stamp (µs since UNIX epoch), never below `created_at`
    pub last_used_at: u64,
    /// Hits served since creation
    pub hit_count: u64,
}

/// Indexed entry. Access bookkeeping is atomic so hits only need the
/// shared index lock.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) locator: String,
    pub(crate) size: u64,
    pub(crate) created_at: u64,
    last_used_at: AtomicU64,
    hit_count: AtomicU64,
}

impl Slot {
    pub(crate) fn new(locator: String, size: u64, created_at: u64) -> Self {
        Self {
            locator,
            size,
            created_at,
            last_used_at: AtomicU64::new(created_at),
            hit_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn from_record(record: IndexRecord) -> Self {
        Self {
            locator: record.locator,
            size: record.size,
            created_at: record.created_at,
            last_used_at: AtomicU64::new(record.last_used_at.max(record.created_at)),
            hit_count: AtomicU64::new(record.hit_count),
        }
    }

    /// Register a hit at `stamp`
    pub(crate) fn touch(&self, stamp: u64) {
        self.last_used_at.fetch_max(stamp, Ordering::Relaxed);
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn last_used_at(&self) -> u64 {
        self.last_used_at.load(Ordering::Relaxed)
    }

    pub(crate) fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    pub(crate) fn to_entry(&self, key: &CacheKey) -> CacheEntry {
        CacheEntry {
            key: key.clone(),
            locator: self.locator.clone(),
            size: self.size,
            created_at: self.created_at,
            last_used_at: self.last_used_at(),
            hit_count: self.hit_count(),
        }
    }

    pub(crate) fn to_record(&self, key: &CacheKey) -> IndexRecord {
        IndexRecord {
            key: key.clone(),
            locator: self.locator.clone(),
            size: self.size,
            created_at: self.created_at,
            last_used_at: self.last_used_at(),
            hit_count: self.hit_count(),
        }
    }
}

/// Strictly increasing microsecond clock.
///
/// Follows wall time but never repeats or goes backwards, so no two
/// creations or accesses share a stamp and LRU order is total.
#[derive(Debug, Default)]
pub(crate) struct StoreClock {
    last: AtomicU64,
}

impl StoreClock {
    /// Make sure future stamps land after `stamp` (used after loading an index)
    pub(crate) fn advance_past(&self, stamp: u64) {
        self.last.fetch_max(stamp, Ordering::Relaxed);
    }

    pub(crate) fn now(&self) -> u64 {
        let wall = wall_micros();

        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Wall time in µs since the UNIX epoch
pub(crate) fn wall_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
