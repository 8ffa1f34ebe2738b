//! Cache Module
//!
//! Per-shard tiered storage: items, tier regions, the shard engine and its statistics.

mod item;
mod node;
mod region;
mod stats;


// Re-export public types
pub use item::{CacheItem, Tier};
pub use node::{CacheNode, TierSplit};
pub use region::{KeyGuard, KeyLocks, Region, DEFAULT_LOCK_STRIPES};
pub use stats::{CacheStats, StatsCounters};
