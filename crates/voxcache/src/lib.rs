//! # voxcache
//!
//! Self-promoting response cache for text-to-speech audio.
//!
//! ## Architecture
//! - **FrequencyTracker**: bounded miss counter deciding which phrases earn storage
//! - **AudioStore** (voxstore): persistent payloads with LRU eviction under a byte cap
//! - **CacheStats**: hit/miss counters and estimated synthesis time saved
//! - **ResponseCache**: the `try_get` / `offer` surface used by the speech pipeline
//!
//! ```no_run
//! use voxcache::{CacheConfig, ResponseCache};
//!
//! let cache = ResponseCache::open(CacheConfig::new("cache/responses"));
//! let audio = match cache.try_get("Hardpoints deployed", "nova", 1.0, "openai") {
//!     Some(audio) => audio,
//!     None => {
//!         let audio = vec![0u8; 4800]; // synthesize here
//!         cache.offer("Hardpoints deployed", "nova", 1.0, "openai", &audio);
//!         audio
//!     }
//! };
//! # let _ = audio;
//! ```

#![warn(missing_docs)]

mod cache;
mod config;
mod locks;
mod phrases;
mod stats;
mod tracker;

pub use cache::{OfferOutcome, ResponseCache};
pub use config::{
    CacheConfig, DEFAULT_GENERATION_COST_MS, DEFAULT_MAX_PHRASE_LEN, DEFAULT_MAX_TRACKED_PHRASES,
    DEFAULT_PROMOTION_THRESHOLD,
};
pub use phrases::COMMON_ACTION_RESPONSES;
pub use stats::{CacheStats, StatsSnapshot};
pub use tracker::{FrequencyTracker, Occurrence};
pub use voxstore::{derive_key, CacheKey, Error, Result};
