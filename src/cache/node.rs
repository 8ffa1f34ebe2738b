//! Cache Node Module
//!
//! One shard of the stash: the hot map, the combined warm/cold map, the three
//! tier regions and the promotion/demotion algorithm that keeps them bounded.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::cache::{CacheItem, CacheStats, KeyGuard, KeyLocks, Region, StatsCounters, Tier};
use crate::config::SplitPolicy;
use crate::error::{CacheError, Result};
use crate::tasks::Crawlable;

// == Tier Split ==
/// Fractions of shard capacity given to the hot and warm tiers. The cold tier
/// receives whatever is left.
///
/// Only built through [`TierSplit::resolve`], so hot + warm never exceeds
/// [`TierSplit::MAX_HOT_WARM`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierSplit {
    hot: f64,
    warm: f64,
}

impl TierSplit {
    /// 10% hot, 20% warm, 70% cold.
    pub const DEFAULT: TierSplit = TierSplit { hot: 0.1, warm: 0.2 };

    /// Largest combined hot+warm share accepted as given.
    pub const MAX_HOT_WARM: f64 = 0.5;

    // == Resolve ==
    /// Turns caller-supplied fractions into a split.
    ///
    /// Unless both fractions are non-zero the default split is used. A pair
    /// whose sum exceeds [`Self::MAX_HOT_WARM`] is handled by `policy`.
    pub fn resolve(hot: f64, warm: f64, policy: SplitPolicy) -> Result<Self> {
        for (name, value) in [("hot_percent", hot), ("warm_percent", warm)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CacheError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if hot == 0.0 || warm == 0.0 {
            return Ok(Self::DEFAULT);
        }

        if hot + warm > Self::MAX_HOT_WARM {
            return match policy {
                SplitPolicy::Reject => Err(CacheError::InvalidConfig(format!(
                    "hot_percent + warm_percent must not exceed {}, got {}",
                    Self::MAX_HOT_WARM,
                    hot + warm
                ))),
                SplitPolicy::Fallback => {
                    debug!(hot, warm, "Tier split too large, using default split");
                    Ok(Self::DEFAULT)
                }
            };
        }

        Ok(Self { hot, warm })
    }

    pub fn hot(&self) -> f64 {
        self.hot
    }

    pub fn warm(&self) -> f64 {
        self.warm
    }

    pub fn cold(&self) -> f64 {
        1.0 - self.hot - self.warm
    }

    /// Region bounds for a shard of `capacity` items, indexed by [`Tier::slot`].
    pub fn sizes(&self, capacity: usize) -> [usize; 3] {
        // Nudge before flooring so 100 * 0.3 does not land on 29.
        let share = |fraction: f64| (capacity as f64 * fraction + 1e-9).floor() as usize;
        let hot = share(self.hot);
        let warm = share(self.warm);
        let cold = capacity.saturating_sub(hot + warm);
        [hot, warm, cold]
    }
}

impl Default for TierSplit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// == Cache Node ==
/// A single shard.
///
/// Every mutation of a key happens while holding that key's stripe in
/// `locks`, so the maps and the regions agree about the key whenever its
/// stripe is free. No lock covering the whole shard exists.
#[derive(Debug)]
pub struct CacheNode<V> {
    index: usize,
    capacity: usize,
    ttl: Duration,
    /// Keys in the hot tier
    hot: DashMap<String, CacheItem<V>>,
    /// Keys in the warm and cold tiers
    rest: DashMap<String, CacheItem<V>>,
    regions: [Region; 3],
    locks: KeyLocks,
    filled: AtomicUsize,
    stats: StatsCounters,
}

impl<V> CacheNode<V>
where
    V: Clone,
{
    // == Constructor ==
    /// Creates shard `index` holding up to `capacity` items.
    pub fn new(index: usize, capacity: usize, split: TierSplit, ttl: Duration) -> Self {
        let [hot, warm, cold] = split.sizes(capacity);
        debug!(
            shard = index,
            capacity, hot, warm, cold, "Creating cache node"
        );

        Self {
            index,
            capacity,
            ttl,
            hot: DashMap::new(),
            rest: DashMap::new(),
            regions: [
                Region::new(Tier::Hot, hot),
                Region::new(Tier::Warm, warm),
                Region::new(Tier::Cold, cold),
            ],
            locks: KeyLocks::default(),
            filled: AtomicUsize::new(0),
            stats: StatsCounters::new(),
        }
    }

    /// Shard with the default 10/20/70 split.
    pub fn with_default_split(index: usize, capacity: usize, ttl: Duration) -> Self {
        Self::new(index, capacity, TierSplit::DEFAULT, ttl)
    }

    // == Put ==
    /// Stores `value` under `key`.
    ///
    /// A hot key is updated in place. A warm or cold key is updated and moved
    /// to warm unless it is already there. A new key enters the hot tier.
    pub fn put(&self, key: &str, value: V) {
        let guard = self.locks.lock(key);

        if let Some(mut item) = self.hot.get_mut(key) {
            item.value = value;
            item.touch();
            return;
        }

        let to_warm = match self.rest.get_mut(key) {
            Some(mut item) => {
                item.value = value;
                item.touch();
                item.tier != Tier::Warm
            }
            None => {
                self.hot
                    .insert(key.to_string(), CacheItem::new(value, self.index));
                self.filled.fetch_add(1, Ordering::SeqCst);
                self.region(Tier::Hot).push(key);
                drop(guard);
                self.rebalance(Tier::Hot);
                return;
            }
        };

        if to_warm {
            self.relocate(key, Tier::Warm, &guard);
            drop(guard);
            self.rebalance(Tier::Warm);
        }
    }

    // == Get ==
    /// Returns a copy of the value for `key`.
    ///
    /// A hit marks the item active and refreshes its timestamp. Warm and cold
    /// hits are re-queued at the newest end of the warm tier.
    pub fn get(&self, key: &str) -> Option<V> {
        let guard = self.locks.lock(key);

        if let Some(mut item) = self.hot.get_mut(key) {
            item.touch();
            self.stats.record_hit();
            return Some(item.value.clone());
        }

        let value = match self.rest.get_mut(key) {
            Some(mut item) => {
                item.touch();
                item.value.clone()
            }
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        self.stats.record_hit();
        self.relocate(key, Tier::Warm, &guard);
        drop(guard);
        self.rebalance(Tier::Warm);
        Some(value)
    }

    // == Remove ==
    /// Deletes `key`, returning its value if it was present.
    pub fn remove(&self, key: &str) -> Option<V> {
        let guard = self.locks.lock(key);
        self.remove_locked(key, &guard).map(|item| item.value)
    }

    // == Sweep Expired ==
    /// Removes every member of `tier` idle for longer than the shard TTL.
    ///
    /// Each key is re-checked under its own stripe, so overlapping sweeps of
    /// the same tier only repeat work. Returns the oldest timestamp among the
    /// survivors, or now if none survived.
    pub fn sweep_expired(&self, tier: Tier) -> Instant {
        let mut oldest = Instant::now();
        let mut expired = 0usize;

        for key in self.region(tier).snapshot() {
            let guard = self.locks.lock(&key);

            let touched = match self.map_for(tier).get(&key) {
                Some(item) if item.tier == tier => item.last_touch,
                _ => continue,
            };

            if Instant::now().saturating_duration_since(touched) > self.ttl {
                if self.remove_locked(&key, &guard).is_some() {
                    self.stats.record_expiration();
                    expired += 1;
                }
            } else if touched < oldest {
                oldest = touched;
            }
        }

        debug!(shard = self.index, %tier, expired, "Sweep finished");
        oldest
    }

    // == Inspection ==
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Items currently held across all tiers.
    pub fn filled(&self) -> usize {
        self.filled.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.filled() == 0
    }

    /// Tier `key` currently lives in.
    pub fn tier_of(&self, key: &str) -> Option<Tier> {
        if let Some(item) = self.hot.get(key) {
            return Some(item.tier);
        }
        self.rest.get(key).map(|item| item.tier)
    }

    pub fn region_len(&self, tier: Tier) -> usize {
        self.region(tier).len()
    }

    pub fn region_capacity(&self, tier: Tier) -> usize {
        self.region(tier).max_size()
    }

    /// Members of `tier`, oldest first.
    pub fn region_keys(&self, tier: Tier) -> Vec<String> {
        self.region(tier).snapshot()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.snapshot();
        stats.filled = self.filled();
        stats.hot_size = self.region_len(Tier::Hot);
        stats.warm_size = self.region_len(Tier::Warm);
        stats.cold_size = self.region_len(Tier::Cold);
        stats
    }

    // == Check Consistency ==
    /// Verifies that maps, regions and the fill counter agree.
    ///
    /// Only meaningful while no other thread is mutating the shard.
    pub fn check_consistency(&self) -> Result<()> {
        let hot_keys: HashSet<String> = self.hot.iter().map(|e| e.key().clone()).collect();
        let rest_keys: HashSet<String> = self.rest.iter().map(|e| e.key().clone()).collect();

        let mut members = [HashSet::new(), HashSet::new(), HashSet::new()];
        for tier in Tier::ALL {
            let region = self.region(tier);
            let snapshot = region.snapshot();
            if snapshot.len() != region.len() {
                return Err(CacheError::Inconsistent(format!(
                    "shard {} {} region counts {} but holds {} keys",
                    self.index,
                    tier,
                    region.len(),
                    snapshot.len()
                )));
            }
            if region.is_over() {
                return Err(CacheError::Inconsistent(format!(
                    "shard {} {} region holds {} keys, bound is {}",
                    self.index,
                    tier,
                    region.len(),
                    region.max_size()
                )));
            }
            members[tier.slot()] = snapshot.into_iter().collect();
        }

        if hot_keys != members[Tier::Hot.slot()] {
            return Err(CacheError::Inconsistent(format!(
                "shard {} hot map and hot region differ",
                self.index
            )));
        }

        let [_, warm, cold] = &members;
        if !warm.is_disjoint(cold) {
            return Err(CacheError::Inconsistent(format!(
                "shard {} has keys in both warm and cold regions",
                self.index
            )));
        }
        let warm_cold: HashSet<String> = warm.union(cold).cloned().collect();
        if rest_keys != warm_cold {
            return Err(CacheError::Inconsistent(format!(
                "shard {} warm/cold map and regions differ",
                self.index
            )));
        }

        if !hot_keys.is_disjoint(&rest_keys) {
            return Err(CacheError::Inconsistent(format!(
                "shard {} has keys in both maps",
                self.index
            )));
        }

        let held = self.hot.len() + self.rest.len();
        if self.filled() != held {
            return Err(CacheError::Inconsistent(format!(
                "shard {} filled is {} but maps hold {}",
                self.index,
                self.filled(),
                held
            )));
        }

        for entry in self.rest.iter() {
            if !members[entry.tier.slot()].contains(entry.key()) {
                return Err(CacheError::Inconsistent(format!(
                    "shard {} key {} is tagged {} but not in that region",
                    self.index,
                    entry.key(),
                    entry.tier
                )));
            }
        }

        Ok(())
    }

    // == Log State ==
    /// Dumps region sizes and members at debug level.
    pub fn log_state(&self) {
        debug!(
            shard = self.index,
            filled = self.filled(),
            hot = self.region_len(Tier::Hot),
            warm = self.region_len(Tier::Warm),
            cold = self.region_len(Tier::Cold),
            "Cache node state"
        );
        for tier in Tier::ALL {
            debug!(shard = self.index, %tier, keys = ?self.region_keys(tier), "Region members");
        }
    }

    // == Internals ==
    fn region(&self, tier: Tier) -> &Region {
        &self.regions[tier.slot()]
    }

    fn map_for(&self, tier: Tier) -> &DashMap<String, CacheItem<V>> {
        match tier {
            Tier::Hot => &self.hot,
            Tier::Warm | Tier::Cold => &self.rest,
        }
    }

    /// Unlinks `key` from its map and region. Caller holds the key's stripe.
    fn remove_locked(&self, key: &str, held: &KeyGuard<'_>) -> Option<CacheItem<V>> {
        let (_, item) = self.hot.remove(key).or_else(|| self.rest.remove(key))?;
        self.region(item.tier).remove(key, held);
        self.filled.fetch_sub(1, Ordering::SeqCst);
        Some(item)
    }

    /// Moves `key` to the newest end of `to`, leaving the hot map if needed.
    /// Caller holds the key's stripe. Never targets the hot tier.
    fn relocate(&self, key: &str, to: Tier, held: &KeyGuard<'_>) -> bool {
        debug_assert!(to != Tier::Hot, "keys are never promoted into hot");

        let from = if let Some((owned, mut item)) = self.hot.remove(key) {
            item.tier = to;
            self.rest.insert(owned, item);
            Tier::Hot
        } else {
            match self.rest.get_mut(key) {
                Some(mut item) => std::mem::replace(&mut item.tier, to),
                None => return false,
            }
        };

        self.region(from).remove(key, held);
        self.region(to).push(key);
        true
    }

    /// Demotes or evicts the oldest members of `tier` until it fits its bound.
    /// Each move re-checks the tier it landed in before the next one.
    fn rebalance(&self, tier: Tier) {
        let region = self.region(tier);

        while region.is_over() {
            let Some(key) = region.oldest() else {
                break;
            };
            let guard = self.locks.lock(&key);

            // Another caller may have moved the key or drained the region
            // while we waited for the stripe.
            if !region.is_over() || region.oldest().as_deref() != Some(key.as_str()) {
                continue;
            }

            let next = match tier {
                Tier::Hot => match self.hot.get(&key).map(|item| item.active) {
                    Some(true) => Tier::Warm,
                    Some(false) => Tier::Cold,
                    None => break,
                },
                Tier::Warm => Tier::Cold,
                Tier::Cold => {
                    if self.remove_locked(&key, &guard).is_some() {
                        self.stats.record_eviction();
                        trace!(shard = self.index, key = %key, "Evicted from cold tier");
                    }
                    continue;
                }
            };

            if self.relocate(&key, next, &guard) {
                self.stats.record_demotion();
                trace!(shard = self.index, key = %key, from = %tier, to = %next, "Demoted");
            }
            drop(guard);
            self.rebalance(next);
        }
    }
}

impl<V> Crawlable for CacheNode<V>
where
    V: Clone + Send + Sync,
{
    fn index(&self) -> usize {
        CacheNode::index(self)
    }

    fn filled(&self) -> usize {
        CacheNode::filled(self)
    }

    fn ttl(&self) -> Duration {
        CacheNode::ttl(self)
    }

    fn sweep(&self, tier: Tier) -> Instant {
        self.sweep_expired(tier)
    }

    fn log_state(&self) {
        CacheNode::log_state(self)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    const LONG_TTL: Duration = Duration::from_secs(240);

    fn node(capacity: usize) -> CacheNode<u32> {
        CacheNode::with_default_split(0, capacity, LONG_TTL)
    }

    #[test]
    fn test_split_sizes_default() {
        assert_eq!(TierSplit::DEFAULT.sizes(100), [10, 20, 70]);
        assert_eq!(TierSplit::DEFAULT.sizes(10), [1, 2, 7]);
    }

    #[test]
    fn test_split_requires_both_fractions() {
        let split = TierSplit::resolve(0.3, 0.0, SplitPolicy::Reject).unwrap();
        assert_eq!(split, TierSplit::DEFAULT);
    }

    #[test]
    fn test_split_custom() {
        let split = TierSplit::resolve(0.2, 0.3, SplitPolicy::Reject).unwrap();
        assert_eq!(split.sizes(100), [20, 30, 50]);
        assert!((split.cold() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_split_too_large_rejected_or_defaulted() {
        let rejected = TierSplit::resolve(0.3, 0.3, SplitPolicy::Reject);
        assert!(matches!(rejected, Err(CacheError::InvalidConfig(_))));

        let fallback = TierSplit::resolve(0.3, 0.3, SplitPolicy::Fallback).unwrap();
        assert_eq!(fallback, TierSplit::DEFAULT);
    }

    #[test]
    fn test_resolved_split_never_exceeds_capacity() {
        let split = TierSplit::resolve(0.9, 0.9, SplitPolicy::Fallback).unwrap();
        let [hot, warm, cold] = split.sizes(100);

        assert_eq!((split.hot(), split.warm()), (0.1, 0.2));
        assert_eq!(hot + warm + cold, 100);
    }

    #[test]
    fn test_split_out_of_range() {
        let result = TierSplit::resolve(-0.1, 0.2, SplitPolicy::Fallback);
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_put_then_get_is_hot() {
        let node = node(100);

        node.put("k", 7);

        assert_eq!(node.get("k"), Some(7));
        assert_eq!(node.tier_of("k"), Some(Tier::Hot));
        assert_eq!(node.filled(), 1);
        node.check_consistency().unwrap();
    }

    #[test]
    fn test_get_missing() {
        let node = node(100);
        assert_eq!(node.get("nope"), None);
        assert_eq!(node.stats().misses, 1);
        assert_eq!(node.filled(), 0);
    }

    #[test]
    fn test_put_overwrites_hot_in_place() {
        let node = node(100);

        node.put("k", 1);
        node.put("k", 2);

        assert_eq!(node.get("k"), Some(2));
        assert_eq!(node.filled(), 1);
        assert_eq!(node.region_len(Tier::Hot), 1);
    }

    #[test]
    fn test_unread_overflow_lands_in_cold() {
        let node = node(100);

        for i in 0..11 {
            node.put(&format!("k{}", i), i);
        }

        assert_eq!(node.tier_of("k0"), Some(Tier::Cold));
        for i in 1..11 {
            assert_eq!(node.tier_of(&format!("k{}", i)), Some(Tier::Hot));
        }
        assert_eq!(node.filled(), 11);
        node.check_consistency().unwrap();
    }

    #[test]
    fn test_active_overflow_lands_in_warm() {
        let node = node(100);

        node.put("k0", 0);
        node.get("k0");
        for i in 1..11 {
            node.put(&format!("k{}", i), i);
        }

        assert_eq!(node.tier_of("k0"), Some(Tier::Warm));
        node.check_consistency().unwrap();
    }

    #[test]
    fn test_fifteen_keys_scenario() {
        let node = CacheNode::new(0, 100, TierSplit::DEFAULT, Duration::from_secs(30));

        for i in 0..15 {
            node.put(&format!("k{}", i), i);
        }

        assert_eq!(node.region_len(Tier::Hot), 10);
        assert_eq!(node.region_len(Tier::Warm) + node.region_len(Tier::Cold), 5);
        assert_eq!(node.region_len(Tier::Cold), 5);
        assert_eq!(node.filled(), 15);
        assert_eq!(node.stats().evictions, 0);
        node.check_consistency().unwrap();
    }

    #[test]
    fn test_get_on_cold_moves_to_warm() {
        let node = node(100);
        for i in 0..11 {
            node.put(&format!("k{}", i), i);
        }
        assert_eq!(node.tier_of("k0"), Some(Tier::Cold));

        assert_eq!(node.get("k0"), Some(0));

        assert_eq!(node.tier_of("k0"), Some(Tier::Warm));
        node.check_consistency().unwrap();
    }

    #[test]
    fn test_put_on_cold_moves_to_warm() {
        let node = node(100);
        for i in 0..11 {
            node.put(&format!("k{}", i), i);
        }

        node.put("k0", 99);

        assert_eq!(node.tier_of("k0"), Some(Tier::Warm));
        assert_eq!(node.get("k0"), Some(99));
        assert_eq!(node.filled(), 11);
    }

    #[test]
    fn test_warm_overflow_demotes_oldest_to_cold() {
        // capacity 10: hot 1, warm 2, cold 7
        let node = node(10);
        for i in 0..4 {
            node.put(&format!("k{}", i), i);
        }
        // k0..k2 went cold; pull them into warm in order.
        node.get("k0");
        node.get("k1");
        node.get("k2");

        assert_eq!(node.tier_of("k0"), Some(Tier::Cold));
        assert_eq!(node.tier_of("k1"), Some(Tier::Warm));
        assert_eq!(node.tier_of("k2"), Some(Tier::Warm));
        assert_eq!(node.region_len(Tier::Warm), 2);
        node.check_consistency().unwrap();
    }

    #[test]
    fn test_cold_overflow_evicts() {
        // capacity 10: hot 1, warm 2, cold 7
        let node = node(10);
        for i in 0..9 {
            node.put(&format!("k{}", i), i);
        }

        assert_eq!(node.filled(), 8);
        assert_eq!(node.get("k0"), None);
        assert_eq!(node.stats().evictions, 1);
        assert_eq!(node.region_len(Tier::Cold), 7);
        node.check_consistency().unwrap();
    }

    #[test]
    fn test_remove() {
        let node = node(100);
        node.put("a", 1);
        for i in 0..12 {
            node.put(&format!("k{}", i), i);
        }

        assert_eq!(node.remove("a"), Some(1));
        assert_eq!(node.remove("a"), None);
        assert_eq!(node.remove("k11"), Some(11));
        assert_eq!(node.filled(), 11);
        node.check_consistency().unwrap();
    }

    #[test]
    fn test_sweep_removes_expired_and_keeps_touched() {
        let node = CacheNode::with_default_split(0, 100, Duration::from_millis(50));
        node.put("old", 1);
        node.put("fresh", 2);

        sleep(Duration::from_millis(80));
        node.get("fresh");

        let before = Instant::now();
        let oldest = node.sweep_expired(Tier::Hot);

        assert_eq!(node.get("old"), None);
        assert_eq!(node.get("fresh"), Some(2));
        assert!(oldest < before);
        assert_eq!(node.stats().expirations, 1);
        node.check_consistency().unwrap();
    }

    #[test]
    fn test_sweep_empty_tier_returns_now() {
        let node = node(100);
        let before = Instant::now();

        let oldest = node.sweep_expired(Tier::Warm);

        assert!(oldest >= before);
    }

    #[test]
    fn test_sweep_only_touches_its_tier() {
        let node = CacheNode::with_default_split(0, 100, Duration::from_millis(20));
        for i in 0..11 {
            node.put(&format!("k{}", i), i);
        }
        sleep(Duration::from_millis(40));

        node.sweep_expired(Tier::Cold);

        assert_eq!(node.tier_of("k0"), None);
        assert_eq!(node.filled(), 10);
        node.check_consistency().unwrap();
    }

    #[test]
    fn test_zero_capacity_hot_tier_cascades() {
        // capacity 5: hot 0, warm 1, cold 4
        let node = node(5);
        node.put("a", 1);

        assert_eq!(node.tier_of("a"), Some(Tier::Cold));
        assert_eq!(node.region_len(Tier::Hot), 0);
        node.check_consistency().unwrap();
    }
}
