//! LRU cache for access decisions

use super::AccessResult;
use crate::core::context::UserContext;
use lru::LruCache;
use std::num::NonZeroUsize;
use xxhash_rust::xxh3::Xxh3;

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// LRU cache of evaluation results keyed by input fingerprint
pub struct DecisionCache {
    cache: Option<LruCache<u128, AccessResult>>,
    stats: CacheStats,
}

impl DecisionCache {
    /// Create a cache holding up to `capacity` decisions; 0 disables it
    pub fn new(capacity: usize) -> Self {
        DecisionCache {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
            stats: CacheStats::default(),
        }
    }

    /// Fingerprint every input that can change a decision
    ///
    /// Returns `None` if the context cannot be encoded, in which case the
    /// caller should skip the cache.
    pub fn fingerprint(
        context: Option<&UserContext>,
        feature_key: &str,
        catalog_digest: u128,
    ) -> Option<u128> {
        let encoded = bincode::serialize(&context).ok()?;

        let mut hasher = Xxh3::new();
        hasher.update(&catalog_digest.to_le_bytes());
        hasher.update(&(feature_key.len() as u64).to_le_bytes());
        hasher.update(feature_key.as_bytes());
        hasher.update(&encoded);
        Some(hasher.digest128())
    }

    pub fn get(&mut self, fingerprint: u128) -> Option<AccessResult> {
        let hit = self
            .cache
            .as_mut()
            .and_then(|cache| cache.get(&fingerprint).copied());
        match hit {
            Some(_) => self.stats.hits += 1,
            None => self.stats.misses += 1,
        }
        hit
    }

    pub fn put(&mut self, fingerprint: u128, result: AccessResult) {
        if let Some(cache) = self.cache.as_mut() {
            cache.put(fingerprint, result);
        }
    }

    pub fn clear(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
