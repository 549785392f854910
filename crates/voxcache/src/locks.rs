//! Per-key mutual exclusion
//!
//! One mutex per cache key in flight, created on demand and dropped with its
//! last holder, so unrelated keys never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use voxstore::CacheKey;

#[derive(Default)]
pub(crate) struct KeyLocks {
    slots: Mutex<HashMap<CacheKey, Arc<Mutex<()>>, RandomState>>,
}

/// Held while a store sequence for `key` runs
pub(crate) struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: CacheKey,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl KeyLocks {
    /// Block until no other caller holds `key`
    pub(crate) fn lock(&self, key: &CacheKey) -> KeyGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        KeyGuard {
            locks: self,
            key: key.clone(),
            guard: Some(slot.lock_arc()),
        }
    }

    /// Keys currently held or awaited
    pub(crate) fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Clones of a slot are only taken under the map lock, so the count
        // checked here cannot grow underneath us.
        let mut slots = self.locks.slots.lock();
        if let Some(guard) = self.guard.take() {
            let slot = Arc::clone(ArcMutexGuard::mutex(&guard));
            drop(guard);
            if Arc::strong_count(&slot) == 2 {
                slots.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use voxstore::derive_key;

    #[test]
    fn test_slot_released_with_last_holder() {
        let locks = KeyLocks::default();
        let key = derive_key("Shields up", "nova", 1.0, "openai");

        {
            let _guard = locks.lock(&key);
            assert_eq!(locks.in_flight(), 1);
        }
        assert_eq!(locks.in_flight(), 0);
    }

    #[test]
    fn test_same_key_is_exclusive() {
        let locks = KeyLocks::default();
        let key = derive_key("Cargo scoop deployed", "nova", 1.0, "openai");
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let _guard = locks.lock(&key);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.in_flight(), 0);
    }

    #[test]
    fn test_distinct_keys_do_not_block() {
        let locks = KeyLocks::default();
        let a = derive_key("Lights on", "nova", 1.0, "openai");
        let b = derive_key("Lights off", "nova", 1.0, "openai");

        let _held = locks.lock(&a);
        thread::scope(|s| {
            s.spawn(|| {
                let _other = locks.lock(&b);
            })
            .join()
            .unwrap();
        });
        assert_eq!(locks.in_flight(), 1);
    }
}
