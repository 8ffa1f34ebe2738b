//! Eviction Policies
//!
//! The seam between the crawlers and the shards they maintain: what a shard
//! exposes to a crawler, how a policy decides a sweep is due, and the table of
//! oldest known timestamps that decision is based on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::Tier;
use crate::config::PolicyKind;
use crate::error::Result;

// == Crawlable ==
/// A shard as seen by the background crawlers.
pub trait Crawlable: Send + Sync {
    fn index(&self) -> usize;

    /// Items currently held.
    fn filled(&self) -> usize;

    fn ttl(&self) -> Duration;

    /// Expires idle members of `tier` and returns the oldest surviving timestamp.
    fn sweep(&self, tier: Tier) -> Instant;

    fn log_state(&self);
}

// == Eviction Policy ==
/// Decides when a tier needs maintenance and performs it.
pub trait EvictionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `tier` of `shard` may hold work, given the oldest timestamp
    /// recorded by its last sweep.
    fn should_sweep(&self, shard: &dyn Crawlable, tier: Tier, oldest: Instant, now: Instant)
        -> bool;

    /// Runs the maintenance pass, returning the new oldest timestamp for the table.
    fn sweep(&self, shard: &dyn Crawlable, tier: Tier) -> Result<Instant>;
}

/// Expires items that have been idle longer than the shard TTL.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtlPolicy;

impl EvictionPolicy for TtlPolicy {
    fn name(&self) -> &'static str {
        "ttl"
    }

    fn should_sweep(
        &self,
        shard: &dyn Crawlable,
        _tier: Tier,
        oldest: Instant,
        now: Instant,
    ) -> bool {
        now.saturating_duration_since(oldest) > shard.ttl()
    }

    fn sweep(&self, shard: &dyn Crawlable, tier: Tier) -> Result<Instant> {
        Ok(shard.sweep(tier))
    }
}

/// Builds the policy selected in configuration.
pub fn policy_for(kind: PolicyKind) -> Arc<dyn EvictionPolicy> {
    match kind {
        PolicyKind::Ttl => Arc::new(TtlPolicy),
    }
}

// == Oldest Timestamp Table ==
/// Per shard, per tier: the oldest last-touch time seen by the latest sweep.
///
/// Only used to decide whether a sweep is worth scheduling.
#[derive(Debug)]
pub struct OldestTimestampTable {
    rows: Vec<Mutex<[Instant; 3]>>,
}

impl OldestTimestampTable {
    /// Seeds every entry with `now`.
    pub fn new(shards: usize, now: Instant) -> Self {
        Self {
            rows: (0..shards).map(|_| Mutex::new([now; 3])).collect(),
        }
    }

    pub fn shards(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, shard: usize, tier: Tier) -> Option<Instant> {
        self.rows.get(shard).map(|row| row.lock()[tier.slot()])
    }

    pub fn set(&self, shard: usize, tier: Tier, oldest: Instant) {
        if let Some(row) = self.rows.get(shard) {
            let mut row = row.lock();
            debug!(
                shard,
                %tier,
                previous_age_ms = row[tier.slot()].elapsed().as_millis() as u64,
                new_age_ms = oldest.elapsed().as_millis() as u64,
                "Changed oldest timestamp"
            );
            row[tier.slot()] = oldest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheNode;

    fn node(ttl: Duration) -> CacheNode<u32> {
        CacheNode::with_default_split(0, 100, ttl)
    }

    #[test]
    fn test_ttl_policy_threshold() {
        let shard = node(Duration::from_secs(30));
        let oldest = Instant::now();
        let policy = TtlPolicy;

        assert!(!policy.should_sweep(&shard, Tier::Hot, oldest, oldest));
        assert!(!policy.should_sweep(&shard, Tier::Hot, oldest, oldest + Duration::from_secs(30)));
        assert!(policy.should_sweep(&shard, Tier::Hot, oldest, oldest + Duration::from_secs(31)));
    }

    #[test]
    fn test_ttl_policy_sweep_delegates() {
        let shard = node(Duration::from_millis(10));
        shard.put("k", 1);
        std::thread::sleep(Duration::from_millis(30));

        let policy = policy_for(PolicyKind::Ttl);
        assert_eq!(policy.name(), "ttl");
        policy.sweep(&shard, Tier::Hot).unwrap();

        assert_eq!(shard.get("k"), None);
    }

    #[test]
    fn test_table_seed_and_update() {
        let now = Instant::now();
        let table = OldestTimestampTable::new(2, now);
        assert_eq!(table.shards(), 2);
        assert_eq!(table.get(1, Tier::Cold), Some(now));

        let later = now + Duration::from_secs(1);
        table.set(1, Tier::Cold, later);

        assert_eq!(table.get(1, Tier::Cold), Some(later));
        assert_eq!(table.get(1, Tier::Hot), Some(now));
        assert_eq!(table.get(5, Tier::Hot), None);
    }
}
