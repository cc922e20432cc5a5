use std::{
    collections::HashMap,
    hash::Hash,
    sync::Mutex,
    time::{Duration, Instant},
};

use bytes::Bytes;
use cloudraid_common::{StripeId, MIB};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ChunkCacheConfig {
    pub max_bytes: usize,
    pub ttl: Duration,
}

impl Default for ChunkCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: (256 * MIB) as usize,
            ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub bytes_in_use: usize,
}

struct Entry {
    payload: Bytes,
    expire_at: Instant,
    access_count: u64,
}

impl Entry {
    /// Eviction priority: lowest goes first. Expired entries score -1.
    fn heat(&self, now: Instant) -> i64 {
        if now > self.expire_at {
            return -1;
        }
        let remaining = self.expire_at.duration_since(now).as_secs() as i64;
        self.access_count as i64 * (remaining + 1)
    }
}

/// Shared core of the TTL + heat-score caches. Every operation is
/// serialized on one mutex; hits refresh the TTL and bump the access
/// count, and eviction removes expired entries first, then ascending heat.
pub(crate) struct HeatCache<K> {
    max_bytes: usize,
    ttl: Duration,
    inner: Mutex<Inner<K>>,
}

struct Inner<K> {
    entries: HashMap<K, Entry>,
    bytes_in_use: usize,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash + Clone> HeatCache<K> {
    pub(crate) fn new(max_bytes: usize, ttl: Duration) -> Self {
        Self {
            max_bytes,
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                bytes_in_use: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<Bytes> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get_mut(key) {
            Some(entry) if now <= entry.expire_at => {
                entry.expire_at = now + self.ttl;
                entry.access_count += 1;
                let payload = entry.payload.clone();
                inner.hits += 1;
                Some(payload)
            }
            Some(_) => {
                Self::remove_entry(&mut inner, key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub(crate) fn put(&self, key: K, payload: Bytes) {
        if payload.len() > self.max_bytes {
            debug!(len = payload.len(), "payload larger than cache, not cached");
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        Self::remove_entry(&mut inner, &key);
        if !Self::make_room(&mut inner, self.max_bytes, payload.len()) {
            return;
        }
        inner.bytes_in_use += payload.len();
        inner.entries.insert(
            key,
            Entry {
                payload,
                expire_at: Instant::now() + self.ttl,
                access_count: 0,
            },
        );
    }

    pub(crate) fn invalidate(&self, key: &K) {
        let mut inner = self.inner.lock().unwrap();
        Self::remove_entry(&mut inner, key);
    }

    pub(crate) fn invalidate_if(&self, mut pred: impl FnMut(&K) -> bool) {
        let mut inner = self.inner.lock().unwrap();
        let victims: Vec<K> = inner.entries.keys().filter(|k| pred(k)).cloned().collect();
        for key in victims {
            Self::remove_entry(&mut inner, &key);
        }
    }

    pub(crate) fn cleanup_expired(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        Self::evict_expired(&mut inner, now);
    }

    pub(crate) fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            bytes_in_use: inner.bytes_in_use,
        }
    }

    fn remove_entry(inner: &mut Inner<K>, key: &K) {
        if let Some(entry) = inner.entries.remove(key) {
            inner.bytes_in_use -= entry.payload.len();
        }
    }

    fn evict_expired(inner: &mut Inner<K>, now: Instant) {
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, e)| now > e.expire_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            Self::remove_entry(inner, &key);
        }
    }

    fn make_room(inner: &mut Inner<K>, max_bytes: usize, needed: usize) -> bool {
        let now = Instant::now();
        Self::evict_expired(inner, now);
        if inner.bytes_in_use + needed <= max_bytes {
            return true;
        }

        let mut scored: Vec<(i64, K)> = inner
            .entries
            .iter()
            .map(|(k, e)| (e.heat(now), k.clone()))
            .collect();
        scored.sort_by_key(|(score, _)| *score);
        for (_, key) in scored {
            Self::remove_entry(inner, &key);
            if inner.bytes_in_use + needed <= max_bytes {
                return true;
            }
        }
        inner.bytes_in_use + needed <= max_bytes
    }
}

/// Bounded in-memory cache of decoded stripe payloads, keyed by stripe id.
pub struct ChunkCache {
    inner: HeatCache<StripeId>,
}

impl ChunkCache {
    pub fn new(config: ChunkCacheConfig) -> Self {
        Self {
            inner: HeatCache::new(config.max_bytes, config.ttl),
        }
    }

    pub fn get(&self, stripe_id: StripeId) -> Option<Bytes> {
        self.inner.get(&stripe_id)
    }

    pub fn put(&self, stripe_id: StripeId, payload: Bytes) {
        self.inner.put(stripe_id, payload)
    }

    pub fn invalidate(&self, stripe_id: StripeId) {
        self.inner.invalidate(&stripe_id)
    }

    pub fn cleanup_expired(&self) {
        self.inner.cleanup_expired()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRIPE: usize = 4 << 20;

    fn mib_cache(max_mib: usize, ttl: Duration) -> ChunkCache {
        ChunkCache::new(ChunkCacheConfig {
            max_bytes: max_mib << 20,
            ttl,
        })
    }

    #[test]
    fn hit_miss_accounting() {
        let cache = mib_cache(16, Duration::from_secs(60));
        assert!(cache.get(1).is_none());
        cache.put(1, Bytes::from(vec![1u8; 100]));
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.bytes_in_use, 100);
    }

    #[test]
    fn oversized_payload_is_refused() {
        let cache = mib_cache(1, Duration::from_secs(60));
        cache.put(1, Bytes::from(vec![0u8; 2 << 20]));
        assert!(cache.get(1).is_none());
        assert_eq!(cache.stats().bytes_in_use, 0);
    }

    #[test]
    fn replacing_reclaims_bytes() {
        let cache = mib_cache(16, Duration::from_secs(60));
        cache.put(1, Bytes::from(vec![0u8; 1000]));
        cache.put(1, Bytes::from(vec![0u8; 10]));
        assert_eq!(cache.stats().bytes_in_use, 10);
    }

    #[test]
    fn ttl_expiry_is_a_miss() {
        let cache = mib_cache(16, Duration::from_millis(20));
        cache.put(1, Bytes::from(vec![0u8; 10]));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(1).is_none());
        assert_eq!(cache.stats().bytes_in_use, 0);
    }

    #[test]
    fn heat_eviction_prefers_cold_entries() {
        // Scenario: 12 MiB budget, three 4 MiB stripes resident. S1 is
        // touched twice, S2 and S3 once each; inserting S4 must evict one
        // of the cold ones and keep S1.
        let cache = mib_cache(12, Duration::from_secs(60));
        let payload = || Bytes::from(vec![0u8; STRIPE]);
        cache.put(1, payload());
        cache.put(2, payload());
        cache.put(3, payload());
        cache.get(1);
        cache.get(1);
        cache.get(2);
        cache.get(3);

        cache.put(4, payload());
        assert!(cache.get(1).is_some(), "hottest entry must survive");
        assert!(cache.get(4).is_some());
        let survivors = [2u64, 3]
            .iter()
            .filter(|&&id| cache.get(id).is_some())
            .count();
        assert_eq!(survivors, 1, "exactly one cold entry evicted");
        assert!(cache.stats().bytes_in_use <= 12 << 20);
    }

    #[test]
    fn bytes_in_use_never_exceeds_budget() {
        let cache = mib_cache(1, Duration::from_secs(60));
        for id in 0..64 {
            cache.put(id, Bytes::from(vec![0u8; 100 << 10]));
            assert!(cache.stats().bytes_in_use <= 1 << 20);
        }
    }
}
