//! ResponseCache: self-promoting audio cache in front of a TTS provider
//!
//! The pipeline calls [`ResponseCache::try_get`] before synthesizing and
//! [`ResponseCache::offer`] after. Misses feed the frequency tracker; only
//! phrases that reached the threshold (or are pre-seeded) get stored.
//! Cache faults never reach the caller: they are logged and turn into misses.

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use voxstore::{AudioStore, CacheKey, PutOutcome, Result};

use crate::config::CacheConfig;
use crate::locks::KeyLocks;
use crate::stats::{CacheStats, StatsSnapshot};
use crate::tracker::FrequencyTracker;

/// Result of an [`ResponseCache::offer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Audio written to the store
    Stored,
    /// Phrase has not earned storage yet; bytes discarded
    NotPromoted,
    /// Another caller already stored this key; bytes discarded
    AlreadyCached,
    /// Nothing to store
    EmptyAudio,
    /// Cache runs in permanent-miss mode
    Disabled,
    /// Store write failed (logged); bytes discarded
    Failed,
}

struct Engine {
    store: AudioStore,
    tracker: Mutex<FrequencyTracker>,
    locks: KeyLocks,
}

/// Response cache handle
pub struct ResponseCache {
    config: CacheConfig,

    /// `None` in permanent-miss mode
    engine: Option<Engine>,

    /// Cache statistics
    stats: CacheStats,
}

impl ResponseCache {
    /// Open the cache, degrading to permanent-miss mode on any setup failure
    ///
    /// # Arguments
    /// * `config` - Cache configuration
    ///
    /// # Returns
    /// * `ResponseCache` - Always usable; check [`ResponseCache::is_enabled`]
    pub fn open(config: CacheConfig) -> Self {
        match Self::try_open(config.clone()) {
            Ok(cache) => cache,
            Err(e) => {
                error!(
                    path = %config.cache_dir.display(),
                    error = %e,
                    "response cache disabled, every lookup will miss"
                );
                Self::disabled(config)
            }
        }
    }

    /// Open the cache, failing on invalid configuration or an unusable directory
    pub fn try_open(config: CacheConfig) -> Result<Self> {
        let policy = config.validate()?;
        let store = AudioStore::open(&config.cache_dir, policy)?;
        let tracker = FrequencyTracker::from_config(&config);

        info!(
            path = %config.cache_dir.display(),
            entries = store.len(),
            bytes = store.total_bytes(),
            max_bytes = config.max_bytes,
            threshold = config.promotion_threshold,
            "response cache ready"
        );

        Ok(Self {
            config,
            engine: Some(Engine {
                store,
                tracker: Mutex::new(tracker),
                locks: KeyLocks::default(),
            }),
            stats: CacheStats::new(),
        })
    }

    /// A cache that never stores anything
    pub fn disabled(config: CacheConfig) -> Self {
        Self {
            config,
            engine: None,
            stats: CacheStats::new(),
        }
    }

    /// Whether the cache is backed by a store
    pub fn is_enabled(&self) -> bool {
        self.engine.is_some()
    }

    /// Look up pre-rendered audio.
    ///
    /// A miss counts one occurrence of `text` toward promotion.
    pub fn try_get(&self, text: &str, voice: &str, speed: f64, provider: &str) -> Option<Vec<u8>> {
        let Some(engine) = &self.engine else {
            self.stats.record_miss();
            return None;
        };

        let key = CacheKey::derive(text, voice, speed, provider);
        match engine.store.get(&key) {
            Ok(Some(audio)) => {
                self.stats.record_hit(self.config.estimated_generation_cost_ms);
                debug!(
                    text = key.text(),
                    bytes = audio.len(),
                    saved_ms = self.config.estimated_generation_cost_ms,
                    "cache hit"
                );
                return Some(audio);
            }
            Ok(None) => {}
            Err(e) => warn!(text = key.text(), error = %e, "cache read failed, treating as miss"),
        }

        self.stats.record_miss();
        let occurrence = engine.tracker.lock().record_occurrence(key.text());
        debug!(
            text = key.text(),
            count = occurrence.count,
            promoted = occurrence.promoted,
            "cache miss"
        );
        None
    }

    /// Hand over freshly synthesized audio after a miss.
    ///
    /// Promotion is re-checked here, so nothing is carried between the
    /// paired `try_get` and `offer`. At most one store per key runs at a
    /// time; the first one wins and later bytes are dropped.
    pub fn offer(&self, text: &str, voice: &str, speed: f64, provider: &str, audio: &[u8]) -> OfferOutcome {
        let Some(engine) = &self.engine else {
            return OfferOutcome::Disabled;
        };

        let key = CacheKey::derive(text, voice, speed, provider);
        if !engine.tracker.lock().is_promoted(key.text()) {
            return OfferOutcome::NotPromoted;
        }
        if audio.is_empty() {
            return OfferOutcome::EmptyAudio;
        }

        let _guard = engine.locks.lock(&key);
        if engine.store.contains(&key) {
            return OfferOutcome::AlreadyCached;
        }

        match engine.store.put(&key, audio) {
            Ok(PutOutcome::Stored { evicted }) => {
                self.stats.record_store();
                self.stats.record_evictions(evicted);
                OfferOutcome::Stored
            }
            Ok(PutOutcome::AlreadyPresent) => OfferOutcome::AlreadyCached,
            Err(e) => {
                warn!(text = key.text(), error = %e, "failed to store audio");
                OfferOutcome::Failed
            }
        }
    }

    /// Treat `phrases` as pre-seeded from now on
    pub fn warm<I, S>(&self, phrases: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Some(engine) = &self.engine {
            engine.tracker.lock().seed(phrases);
        }
    }

    /// Session statistics plus current occupancy
    pub fn snapshot(&self) -> StatsSnapshot {
        let (bytes, entries) = match &self.engine {
            Some(engine) => (engine.store.total_bytes(), engine.store.len()),
            None => (0, 0),
        };
        self.stats.snapshot(bytes, entries)
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Remove every stored entry, occurrence count and statistic.
    /// Configured seeds survive.
    pub fn clear(&self) {
        if let Some(engine) = &self.engine {
            if let Err(e) = engine.store.clear() {
                warn!(error = %e, "failed to clear stored audio");
            }
            engine.tracker.lock().clear();
        }
        self.stats.reset();
    }

    /// Get the number of stored entries
    pub fn len(&self) -> usize {
        self.engine.as_ref().map_or(0, |engine| engine.store.len())
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Underlying store, if enabled
    pub fn store(&self) -> Option<&AudioStore> {
        self.engine.as_ref().map(|engine| &engine.store)
    }

    /// Configuration in force
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Persist pending hit bookkeeping
    pub fn flush(&self) -> Result<()> {
        match &self.engine {
            Some(engine) => engine.store.flush(),
            None => Ok(()),
        }
    }

    /// Flush and close the cache
    pub fn close(self) -> Result<()> {
        match &self.engine {
            Some(engine) => engine.store.close(),
            None => Ok(()),
        }
    }
}
