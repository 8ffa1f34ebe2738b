//! ByteStash - An embeddable sharded in-memory cache
//!
//! Keys are spread over independent shards, each keeping its items in hot,
//! warm and cold tiers. Background crawlers expire items that outlive their TTL.

pub mod cache;
pub mod config;
pub mod error;
pub mod stash;
pub mod tasks;

pub use cache::{CacheNode, CacheStats, Tier, TierSplit};
pub use config::{PolicyKind, SplitPolicy, StashConfig, ValidatedConfig};
pub use error::{CacheError, Result};
pub use stash::{ByteStash, DerivedKey};
pub use tasks::{Maintenance, MaintenanceSettings};
