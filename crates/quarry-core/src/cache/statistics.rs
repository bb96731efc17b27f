//! Lock-free runtime statistics, global and per cache region.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Counters for one second-level cache region.
#[derive(Debug, Default)]
pub struct RegionStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
}

impl RegionStatistics {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }
}

/// Factory-wide statistics. Recording is a no-op while disabled.
#[derive(Debug)]
pub struct Statistics {
    enabled: AtomicBool,

    // Second-level cache
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_puts: AtomicU64,
    regions: DashMap<String, RegionStatistics>,

    // Entities
    entity_loads: AtomicU64,
    entity_fetches: AtomicU64,
    entity_inserts: AtomicU64,
    entity_updates: AtomicU64,
    entity_deletes: AtomicU64,
    collection_loads: AtomicU64,

    // Queries
    query_executions: AtomicU64,
    interpretation_hits: AtomicU64,
    interpretation_misses: AtomicU64,
    flushes: AtomicU64,
}

/// Point-in-time copy of the global counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatisticsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_puts: u64,
    pub entity_loads: u64,
    pub entity_fetches: u64,
    pub entity_inserts: u64,
    pub entity_updates: u64,
    pub entity_deletes: u64,
    pub collection_loads: u64,
    pub query_executions: u64,
    pub interpretation_hits: u64,
    pub interpretation_misses: u64,
    pub flushes: u64,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Statistics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_puts: AtomicU64::new(0),
            regions: DashMap::new(),
            entity_loads: AtomicU64::new(0),
            entity_fetches: AtomicU64::new(0),
            entity_inserts: AtomicU64::new(0),
            entity_updates: AtomicU64::new(0),
            entity_deletes: AtomicU64::new(0),
            collection_loads: AtomicU64::new(0),
            query_executions: AtomicU64::new(0),
            interpretation_hits: AtomicU64::new(0),
            interpretation_misses: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn bump(&self, counter: &AtomicU64) {
        if self.is_enabled() {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn bump_region(&self, region: &str, pick: impl Fn(&RegionStatistics) -> &AtomicU64) {
        if self.is_enabled() {
            let stats = self.regions.entry(region.to_string()).or_default();
            pick(&*stats).fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_hit(&self, region: &str) {
        self.bump(&self.cache_hits);
        self.bump_region(region, |r| &r.hits);
    }

    pub fn record_cache_miss(&self, region: &str) {
        self.bump(&self.cache_misses);
        self.bump_region(region, |r| &r.misses);
    }

    pub fn record_cache_put(&self, region: &str) {
        self.bump(&self.cache_puts);
        self.bump_region(region, |r| &r.puts);
    }

    /// An entity hydrated from a result row.
    pub fn record_entity_load(&self) {
        self.bump(&self.entity_loads);
    }

    /// A lazy reference initialized by a separate select.
    pub fn record_entity_fetch(&self) {
        self.bump(&self.entity_fetches);
    }

    pub fn record_entity_insert(&self) {
        self.bump(&self.entity_inserts);
    }

    pub fn record_entity_update(&self) {
        self.bump(&self.entity_updates);
    }

    pub fn record_entity_delete(&self) {
        self.bump(&self.entity_deletes);
    }

    pub fn record_collection_load(&self) {
        self.bump(&self.collection_loads);
    }

    pub fn record_query_execution(&self) {
        self.bump(&self.query_executions);
    }

    pub fn record_interpretation_hit(&self) {
        self.bump(&self.interpretation_hits);
    }

    pub fn record_interpretation_miss(&self) {
        self.bump(&self.interpretation_misses);
    }

    pub fn record_flush(&self) {
        self.bump(&self.flushes);
    }

    /// Per-region counters as `(hits, misses, puts)`.
    pub fn region(&self, region: &str) -> Option<(u64, u64, u64)> {
        self.regions
            .get(region)
            .map(|r| (r.hits(), r.misses(), r.puts()))
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatisticsSnapshot {
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            cache_puts: load(&self.cache_puts),
            entity_loads: load(&self.entity_loads),
            entity_fetches: load(&self.entity_fetches),
            entity_inserts: load(&self.entity_inserts),
            entity_updates: load(&self.entity_updates),
            entity_deletes: load(&self.entity_deletes),
            collection_loads: load(&self.collection_loads),
            query_executions: load(&self.query_executions),
            interpretation_hits: load(&self.interpretation_hits),
            interpretation_misses: load(&self.interpretation_misses),
            flushes: load(&self.flushes),
        }
    }

    pub fn clear(&self) {
        for counter in [
            &self.cache_hits,
            &self.cache_misses,
            &self.cache_puts,
            &self.entity_loads,
            &self.entity_fetches,
            &self.entity_inserts,
            &self.entity_updates,
            &self.entity_deletes,
            &self.collection_loads,
            &self.query_executions,
            &self.interpretation_hits,
            &self.interpretation_misses,
            &self.flushes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.regions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn records_global_and_region() {
        let stats = Statistics::default();
        stats.record_cache_miss("Order");
        stats.record_cache_put("Order");
        stats.record_cache_hit("Order");
        stats.record_cache_hit("Customer");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(stats.region("Order"), Some((1, 1, 1)));
        assert_eq!(stats.region("Customer"), Some((1, 0, 0)));
        assert_eq!(stats.region("LineItem"), None);
    }

    #[test]
    fn disabled_records_nothing() {
        let stats = Statistics::new(false);
        stats.record_entity_load();
        stats.record_cache_hit("Order");
        assert_eq!(stats.snapshot(), StatisticsSnapshot::default());
        assert!(stats.region("Order").is_none());
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(Statistics::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_query_execution();
                        stats.record_cache_hit("Order");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().query_executions, 8000);
        assert_eq!(stats.region("Order").map(|r| r.0), Some(8000));
    }

    #[test]
    fn clear_resets() {
        let stats = Statistics::default();
        stats.record_flush();
        stats.record_cache_put("Order");
        stats.clear();
        assert_eq!(stats.snapshot().flushes, 0);
        assert!(stats.region("Order").is_none());
    }
}
