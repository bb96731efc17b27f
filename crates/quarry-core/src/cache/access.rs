//! Entity-level view over a [`SecondLevelCache`] that keeps statistics.

use super::{CacheEntry, CacheKey, SecondLevelCache, Statistics};
use crate::error::Error;
use crate::metamodel::EntityDescriptor;
use crate::value::Identifier;
use tracing::{trace, warn};

/// Reads and writes cached entity state by descriptor and identifier.
/// Entities that are not cacheable are never looked up or stored.
#[derive(Clone, Copy)]
pub struct EntityCacheAccess<'a> {
    cache: &'a dyn SecondLevelCache,
    statistics: &'a Statistics,
}

impl<'a> EntityCacheAccess<'a> {
    pub fn new(cache: &'a dyn SecondLevelCache, statistics: &'a Statistics) -> Self {
        Self { cache, statistics }
    }

    pub fn get(&self, descriptor: &EntityDescriptor, id: &Identifier) -> Option<CacheEntry> {
        if !descriptor.cacheable {
            return None;
        }
        let region = descriptor.cache_region();
        let key = CacheKey::new(descriptor.root_entity_name(), id.clone());
        match self.cache.get(region, &key) {
            Some(bytes) => match CacheEntry::from_bytes(&bytes) {
                Ok(entry) => {
                    trace!(%key, "second-level cache hit");
                    self.statistics.record_cache_hit(region);
                    Some(entry)
                }
                Err(e) => {
                    warn!(%key, error = %e, "dropping undecodable cache entry");
                    self.cache.evict(region, &key);
                    self.statistics.record_cache_miss(region);
                    None
                }
            },
            None => {
                self.statistics.record_cache_miss(region);
                None
            }
        }
    }

    pub fn put(
        &self,
        descriptor: &EntityDescriptor,
        id: &Identifier,
        entry: &CacheEntry,
    ) -> Result<(), Error> {
        if !descriptor.cacheable {
            return Ok(());
        }
        let region = descriptor.cache_region();
        let key = CacheKey::new(descriptor.root_entity_name(), id.clone());
        trace!(%key, "second-level cache put");
        self.cache.put(region, key, entry.to_bytes()?);
        self.statistics.record_cache_put(region);
        Ok(())
    }

    pub fn evict(&self, descriptor: &EntityDescriptor, id: &Identifier) {
        if descriptor.cacheable {
            let key = CacheKey::new(descriptor.root_entity_name(), id.clone());
            self.cache.evict(descriptor.cache_region(), &key);
        }
    }

    pub fn evict_region(&self, descriptor: &EntityDescriptor) {
        if descriptor.cacheable {
            self.cache.evict_region(descriptor.cache_region());
        }
    }
}
