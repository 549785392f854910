//! Cache configuration
//!
//! Read once at construction. Every field has a default, so a config file
//! only needs the fields it changes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use voxstore::{Error, EvictionPolicy, Result, DEFAULT_MAX_BYTES, DEFAULT_TARGET_FRACTION};

/// Default number of occurrences before a phrase is stored
pub const DEFAULT_PROMOTION_THRESHOLD: u32 = 3;

/// Default number of distinct phrases the frequency tracker remembers
pub const DEFAULT_MAX_TRACKED_PHRASES: usize = 4096;

/// Phrases longer than this (in characters) are never stored by default
pub const DEFAULT_MAX_PHRASE_LEN: usize = 200;

/// Default synthesis latency credited to each hit
pub const DEFAULT_GENERATION_COST_MS: u64 = 950;

/// Response cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the index and payload files
    pub cache_dir: PathBuf,
    /// Cap on the total stored audio in bytes
    pub max_bytes: u64,
    /// Occurrences needed before a phrase is stored
    pub promotion_threshold: u32,
    /// Fill level an eviction pass shrinks the store to, in (0, 1)
    pub eviction_target_fraction: f64,
    /// Phrases stored on first use, bypassing the threshold.
    ///
    /// Matching ignores surrounding whitespace and letter case, but cache
    /// keys do not: "shields up" and "Shields up" are both eligible and are
    /// stored as separate entries.
    pub pre_seeded_phrases: Vec<String>,
    /// Distinct phrases the frequency tracker remembers
    pub max_tracked_phrases: usize,
    /// Longest phrase (in characters) eligible for storage
    pub max_phrase_len: usize,
    /// Synthesis latency credited to each hit, in milliseconds
    pub estimated_generation_cost_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache/responses"),
            max_bytes: DEFAULT_MAX_BYTES,
            promotion_threshold: DEFAULT_PROMOTION_THRESHOLD,
            eviction_target_fraction: DEFAULT_TARGET_FRACTION,
            pre_seeded_phrases: Vec::new(),
            max_tracked_phrases: DEFAULT_MAX_TRACKED_PHRASES,
            max_phrase_len: DEFAULT_MAX_PHRASE_LEN,
            estimated_generation_cost_ms: DEFAULT_GENERATION_COST_MS,
        }
    }
}

impl CacheConfig {
    /// Default configuration rooted at `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Set the size cap
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Set the promotion threshold
    pub fn with_promotion_threshold(mut self, threshold: u32) -> Self {
        self.promotion_threshold = threshold;
        self
    }

    /// Set the eviction target fraction
    pub fn with_eviction_target_fraction(mut self, fraction: f64) -> Self {
        self.eviction_target_fraction = fraction;
        self
    }

    /// Set the pre-seeded phrases
    pub fn with_pre_seeded_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pre_seeded_phrases = phrases.into_iter().map(Into::into).collect();
        self
    }

    /// Set the frequency tracker capacity
    pub fn with_max_tracked_phrases(mut self, max: usize) -> Self {
        self.max_tracked_phrases = max;
        self
    }

    /// Set the longest storable phrase
    pub fn with_max_phrase_len(mut self, max: usize) -> Self {
        self.max_phrase_len = max;
        self
    }

    /// Check every field, returning the eviction policy it describes
    pub fn validate(&self) -> Result<EvictionPolicy> {
        if self.promotion_threshold == 0 {
            return Err(Error::InvalidConfig(
                "promotion_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_tracked_phrases == 0 {
            return Err(Error::InvalidConfig(
                "max_tracked_phrases must be at least 1".to_string(),
            ));
        }
        EvictionPolicy::new(self.max_bytes, self.eviction_target_fraction)
    }
}
