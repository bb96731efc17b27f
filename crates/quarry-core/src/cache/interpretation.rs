//! Cache of interpreted (semantically built) queries keyed by query text.
//!
//! The metamodel is immutable for the lifetime of a factory, so entries never
//! go stale; the cache only bounds its size, evicting the least-hit entry.

use crate::sqm::SqmStatement;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CachedInterpretation {
    statement: Arc<SqmStatement>,
    hit_count: AtomicU64,
}

impl CachedInterpretation {
    fn hits(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }
}

/// Hit/miss/eviction counters of the interpretation cache.
#[derive(Debug, Default)]
pub struct InterpretationCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InterpretationCacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Hit rate between 0.0 and 1.0.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Thread-safe, bounded cache of SQM statements.
#[derive(Debug)]
pub struct QueryInterpretationCache {
    entries: RwLock<HashMap<String, CachedInterpretation>>,
    max_entries: usize,
    stats: InterpretationCacheStats,
}

impl QueryInterpretationCache {
    /// A cache holding at most `max_entries` statements. Zero disables caching.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
            stats: InterpretationCacheStats::default(),
        }
    }

    pub fn get(&self, query: &str) -> Option<Arc<SqmStatement>> {
        let guard = self.entries.read();
        match guard.get(query) {
            Some(cached) => {
                cached.hit_count.fetch_add(1, Ordering::Relaxed);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&cached.statement))
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, query: &str, statement: Arc<SqmStatement>) {
        if self.max_entries == 0 {
            return;
        }
        let mut guard = self.entries.write();
        if guard.len() >= self.max_entries && !guard.contains_key(query) {
            let victim = guard
                .iter()
                .min_by_key(|(_, v)| v.hits())
                .map(|(k, _)| k.clone());
            if let Some(key) = victim {
                guard.remove(&key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        guard.insert(
            query.to_string(),
            CachedInterpretation {
                statement,
                hit_count: AtomicU64::new(0),
            },
        );
    }

    /// Return the cached statement or build, cache and return it.
    pub fn get_or_try_insert<E>(
        &self,
        query: &str,
        build: impl FnOnce() -> Result<SqmStatement, E>,
    ) -> Result<(Arc<SqmStatement>, bool), E> {
        if let Some(statement) = self.get(query) {
            return Ok((statement, true));
        }
        let statement = Arc::new(build()?);
        self.insert(query, Arc::clone(&statement));
        Ok((statement, false))
    }

    pub fn stats(&self) -> &InterpretationCacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqm::{SqmDeleteStatement, SqmRoot};
    use crate::path::NavigablePath;

    fn statement(entity: &str) -> SqmStatement {
        SqmStatement::Delete(SqmDeleteStatement {
            target: SqmRoot {
                entity: entity.to_string(),
                alias: None,
                navigable_path: NavigablePath::root(entity, "_0"),
            },
            where_clause: None,
            parameters: Vec::new(),
        })
    }

    #[test]
    fn miss_then_hit() {
        let cache = QueryInterpretationCache::new(4);
        assert!(cache.get("delete from Order").is_none());
        cache.insert("delete from Order", Arc::new(statement("Order")));
        assert!(cache.get("delete from Order").is_some());
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn evicts_least_hit() {
        let cache = QueryInterpretationCache::new(2);
        cache.insert("a", Arc::new(statement("A")));
        cache.insert("b", Arc::new(statement("B")));
        cache.get("a");
        cache.insert("c", Arc::new(statement("C")));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn zero_size_disables() {
        let cache = QueryInterpretationCache::new(0);
        let (_, hit) = cache
            .get_or_try_insert::<()>("q", || Ok(statement("A")))
            .unwrap();
        assert!(!hit);
        assert!(cache.is_empty());
    }
}
