//! Size-bounded LRU eviction
//!
//! Once the total passes `max_bytes`, entries go oldest-used first (ties on
//! creation time) in one batch until the total is at or below
//! `target_fraction * max_bytes`. Evicting to the lower mark spreads the cost
//! over many later insertions instead of paying it on every put.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::key::CacheKey;

/// Default capacity (100 MiB)
pub const DEFAULT_MAX_BYTES: u64 = 100 * 1024 * 1024;

/// Default fill level after an eviction pass
pub const DEFAULT_TARGET_FRACTION: f64 = 0.8;

/// Candidate for eviction
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Entry identity
    pub key: &'a CacheKey,
    /// Payload size in bytes
    pub size: u64,
    /// Last access stamp
    pub last_used_at: u64,
    /// Creation stamp
    pub created_at: u64,
}

/// Outcome of planning one eviction pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EvictionPlan {
    /// Keys to remove, oldest first
    pub victims: Vec<CacheKey>,
    /// Bytes released by removing `victims`
    pub freed: u64,
    /// Total left after the pass
    pub remaining: u64,
    /// Still above `max_bytes` after the pass (only the protected entry is left over budget)
    pub over_capacity: bool,
}

/// LRU eviction thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    max_bytes: u64,
    target_fraction: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            target_fraction: DEFAULT_TARGET_FRACTION,
        }
    }
}

impl EvictionPolicy {
    /// Create a policy
    ///
    /// # Arguments
    /// * `max_bytes` - Hard cap on the total payload size, must be non-zero
    /// * `target_fraction` - Fill level to evict down to, strictly inside (0, 1)
    pub fn new(max_bytes: u64, target_fraction: f64) -> Result<Self> {
        if max_bytes == 0 {
            return Err(Error::InvalidConfig("max_bytes must be greater than 0".to_string()));
        }
        if !(target_fraction > 0.0 && target_fraction < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "eviction target fraction must be in (0, 1), got {}",
                target_fraction
            )));
        }
        Ok(Self {
            max_bytes,
            target_fraction,
        })
    }

    /// Hard cap on the total payload size
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Fill level an eviction pass evicts down to
    pub fn target_fraction(&self) -> f64 {
        self.target_fraction
    }

    /// Byte total an eviction pass evicts down to
    pub fn target_bytes(&self) -> u64 {
        (self.max_bytes as f64 * self.target_fraction).round() as u64
    }

    /// Whether `total` breaks the cap
    pub fn needs_eviction(&self, total: u64) -> bool {
        total > self.max_bytes
    }

    /// Pick the entries to remove so that `total` drops to the target.
    ///
    /// `protected` (the entry just inserted) is never chosen. If it alone
    /// exceeds the cap the plan is flagged `over_capacity`; it will be the
    /// oldest candidate on the next pass.
    pub fn plan<'a, I>(&self, total: u64, candidates: I, protected: Option<&CacheKey>) -> EvictionPlan
    where
        I: IntoIterator<Item = Candidate<'a>>,
    {
        if !self.needs_eviction(total) {
            return EvictionPlan {
                remaining: total,
                ..EvictionPlan::default()
            };
        }

        let mut ordered: Vec<Candidate<'a>> = candidates
            .into_iter()
            .filter(|c| Some(c.key) != protected)
            .collect();
        ordered.sort_by(lru_order);

        let target = self.target_bytes();
        let mut plan = EvictionPlan {
            remaining: total,
            ..EvictionPlan::default()
        };
        for candidate in ordered {
            if plan.remaining <= target {
                break;
            }
            plan.remaining = plan.remaining.saturating_sub(candidate.size);
            plan.freed += candidate.size;
            plan.victims.push(candidate.key.clone());
        }
        plan.over_capacity = plan.remaining > self.max_bytes;
        plan
    }
}

fn lru_order(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    a.last_used_at
        .cmp(&b.last_used_at)
        .then(a.created_at.cmp(&b.created_at))
        .then_with(|| a.key.cmp(b.key))
}
