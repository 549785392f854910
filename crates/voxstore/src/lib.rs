//! # voxstore
//!
//! Durable storage engine for pre-rendered speech audio.
//!
//! ## Design
//! - One payload file per entry, one JSON-lines index for all metadata
//! - Payloads and index rewrites go through temp-file plus rename; plain inserts
//!   append one index line. The index never names a missing payload
//! - Size-capped LRU eviction down to a target fill level, run inside `put`
//! - Hits only take the index lock shared; eviction takes it exclusively

#![warn(missing_docs)]

mod entry;
mod error;
mod evict;
pub mod format;
mod key;
mod store;

pub use entry::CacheEntry;
pub use error::{Error, Result};
pub use evict::{
    Candidate, EvictionPlan, EvictionPolicy, DEFAULT_MAX_BYTES, DEFAULT_TARGET_FRACTION,
};
pub use key::{derive_key, CacheKey, SPEED_SCALE};
pub use store::{AudioStore, LoadReport, PutOutcome, INDEX_FILE};
