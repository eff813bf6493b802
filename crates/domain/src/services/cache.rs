use std::time::Duration;

use moka::sync::Cache;

/// Trait describing the "already dispatched" transaction set.
pub trait SeenCache: Send + Sync {
    /// Atomically records `tx_hash` and returns `true` only for the caller
    /// that inserted it first.
    fn first_sighting(&self, tx_hash: &str) -> bool;
}

/// Bounded dedup cache keyed by transaction hash. Entries age out after the
/// TTL or when capacity pressure evicts them.
#[derive(Debug)]
pub struct SeenTxCache {
    seen: Cache<String, ()>,
}

impl SeenCache for SeenTxCache {
    fn first_sighting(&self, tx_hash: &str) -> bool {
        self.seen.entry_by_ref(tx_hash).or_insert(()).is_fresh()
    }
}

impl SeenTxCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);
    pub const DEFAULT_CAPACITY: u64 = 100_000;
    /// Longest TTL the cache accepts; larger values are clamped.
    pub const MAX_TTL: Duration = Duration::from_secs(365 * 86_400);

    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: Cache::builder()
                .time_to_live(ttl.min(Self::MAX_TTL))
                .max_capacity(capacity)
                .build(),
        }
    }
}

impl Default for SeenTxCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_sighting_is_reported_once() {
        let cache = SeenTxCache::default();
        assert!(cache.first_sighting("0xabc"));
        assert!(!cache.first_sighting("0xabc"));
        assert!(cache.first_sighting("0xdef"));
    }

    #[test]
    fn oversized_ttl_is_clamped() {
        let cache = SeenTxCache::with_capacity(Duration::from_secs(u64::MAX), 10);
        assert!(cache.first_sighting("0xabc"));
        assert!(!cache.first_sighting("0xabc"));
    }

    #[test]
    fn concurrent_sightings_elect_a_single_winner() {
        let cache = Arc::new(SeenTxCache::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.first_sighting("0xfeed"))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|fresh| *fresh)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = SeenTxCache::with_capacity(Duration::from_millis(20), 16);
        assert!(cache.first_sighting("0xabc"));
        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.first_sighting("0xabc"));
    }
}
