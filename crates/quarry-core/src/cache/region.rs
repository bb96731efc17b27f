//! Second-level cache SPI and the default in-memory implementation.

use crate::value::Identifier;
use dashmap::DashMap;
use std::fmt;

/// Identity of a cached entity inside a region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Hierarchy root name.
    pub entity: String,
    pub id: Identifier,
}

impl CacheKey {
    pub fn new(entity: impl Into<String>, id: Identifier) -> Self {
        Self {
            entity: entity.into(),
            id,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

/// Pluggable second-level cache.
///
/// Values are opaque encoded [`CacheEntry`](super::CacheEntry) bytes, so an
/// implementation can live out of process. Every call is atomic on its own.
pub trait SecondLevelCache: Send + Sync {
    fn get(&self, region: &str, key: &CacheKey) -> Option<Vec<u8>>;

    fn put(&self, region: &str, key: CacheKey, value: Vec<u8>);

    fn evict(&self, region: &str, key: &CacheKey);

    fn evict_region(&self, region: &str);

    fn clear(&self);

    fn contains(&self, region: &str, key: &CacheKey) -> bool {
        self.get(region, key).is_some()
    }
}

/// Process-local cache backed by a concurrent map per region.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    regions: DashMap<String, DashMap<CacheKey, Vec<u8>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a region.
    pub fn region_size(&self, region: &str) -> usize {
        self.regions.get(region).map(|r| r.len()).unwrap_or(0)
    }
}

impl SecondLevelCache for InMemoryCache {
    fn get(&self, region: &str, key: &CacheKey) -> Option<Vec<u8>> {
        let region = self.regions.get(region)?;
        let value = region.get(key)?;
        Some(value.clone())
    }

    fn put(&self, region: &str, key: CacheKey, value: Vec<u8>) {
        self.regions
            .entry(region.to_string())
            .or_default()
            .insert(key, value);
    }

    fn evict(&self, region: &str, key: &CacheKey) {
        if let Some(region) = self.regions.get(region) {
            region.remove(key);
        }
    }

    fn evict_region(&self, region: &str) {
        self.regions.remove(region);
    }

    fn clear(&self) {
        self.regions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn put_get_evict() {
        let cache = InMemoryCache::new();
        let key = CacheKey::new("Order", Identifier::simple(1i64));
        cache.put("Order", key.clone(), vec![1, 2]);
        assert_eq!(cache.get("Order", &key), Some(vec![1, 2]));
        assert!(cache.contains("Order", &key));
        assert!(cache.get("Customer", &key).is_none());

        cache.evict("Order", &key);
        assert!(cache.get("Order", &key).is_none());
    }

    #[test]
    fn evict_region_leaves_others() {
        let cache = InMemoryCache::new();
        cache.put("Order", CacheKey::new("Order", 1i64.into()), vec![1]);
        cache.put("Customer", CacheKey::new("Customer", 1i64.into()), vec![2]);
        cache.evict_region("Order");
        assert_eq!(cache.region_size("Order"), 0);
        assert_eq!(cache.region_size("Customer"), 1);
    }

    #[test]
    fn concurrent_puts() {
        let cache = Arc::new(InMemoryCache::new());
        let handles: Vec<_> = (0..4i64)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..100i64 {
                        cache.put("Order", CacheKey::new("Order", (t * 100 + i).into()), vec![]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.region_size("Order"), 400);
    }
}
