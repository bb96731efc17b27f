//! Second-level cache SPI, statistics, and the query interpretation cache.
//!
//! The second-level cache is shared by every session of a factory and keeps
//! entity state in disassembled form (plain column values, with references
//! reduced to foreign-key identifiers). Implementations must be safe to call
//! from several threads; sessions never hold a lock across a cache call.

mod access;
mod entry;
mod interpretation;
mod region;
mod statistics;

pub use access::EntityCacheAccess;
pub use entry::CacheEntry;
pub use interpretation::{InterpretationCacheStats, QueryInterpretationCache};
pub use region::{CacheKey, InMemoryCache, SecondLevelCache};
pub use statistics::{RegionStatistics, Statistics, StatisticsSnapshot};
