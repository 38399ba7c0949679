//! Per-key mutual exclusion.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, MutexGuard};

/// A sharded lock table keyed by session id.
///
/// Keys hashing to the same shard share a lock; distinct keys on different
/// shards never contend. Guards must not be held across an `.await`.
#[derive(Debug)]
pub struct KeyLocks {
    shards: Box<[Mutex<()>]>,
}

impl KeyLocks {
    /// Create a table with `shards` locks (at least one).
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index for `key`.
    pub fn shard_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Block until the lock covering `key` is held.
    pub fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.shards[self.shard_of(key)].lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_same_key_same_shard() {
        let locks = KeyLocks::new(16);
        assert_eq!(locks.shard_of("session-1"), locks.shard_of("session-1"));
        assert!(locks.shard_of("session-1") < 16);
    }

    #[test]
    fn test_zero_shards_clamped() {
        let locks = KeyLocks::new(0);
        assert_eq!(locks.shard_count(), 1);
        drop(locks.lock("any"));
    }

    #[test]
    fn test_serializes_read_modify_write() {
        let locks = Arc::new(KeyLocks::new(8));
        let value = Arc::new(parking_lot::Mutex::new(0u64));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let value = Arc::clone(&value);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let _guard = locks.lock("s1");
                        let read = *value.lock();
                        *value.lock() = read + 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*value.lock(), 4_000);
    }
}
