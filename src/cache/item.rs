//! Cache Item Module
//!
//! Defines the tier classification and the per-key record a shard stores.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

// == Tier ==
/// Recency/activity class of a cached key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    /// All tiers, hottest first.
    pub const ALL: [Tier; 3] = [Tier::Hot, Tier::Warm, Tier::Cold];

    /// Position of the tier inside per-tier arrays.
    pub const fn slot(self) -> usize {
        match self {
            Tier::Hot => 0,
            Tier::Warm => 1,
            Tier::Cold => 2,
        }
    }

    /// Name used in logs and stats.
    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Cache Item ==
/// A single cached value and the bookkeeping the tier algorithm needs.
#[derive(Debug, Clone)]
pub struct CacheItem<V> {
    /// The stored value
    pub value: V,
    /// Touched since the last tier decision
    pub active: bool,
    /// Last get/put of this key
    pub last_touch: Instant,
    /// Tier the key currently belongs to
    pub tier: Tier,
    /// Shard that created the item
    pub shard_id: usize,
}

impl<V> CacheItem<V> {
    // == Constructor ==
    /// Creates a fresh, inactive item. New items always start in the hot tier.
    pub fn new(value: V, shard_id: usize) -> Self {
        Self {
            value,
            active: false,
            last_touch: Instant::now(),
            tier: Tier::Hot,
            shard_id,
        }
    }

    // == Touch ==
    /// Marks the item as accessed now.
    pub fn touch(&mut self) {
        self.active = true;
        self.last_touch = Instant::now();
    }

    // == Idle Time ==
    /// Time since the last touch, measured against `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_touch)
    }

    // == Is Expired ==
    /// An item expires once it has been idle strictly longer than `ttl`.
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        self.idle_for(now) > ttl
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_creation() {
        let item = CacheItem::new("value", 2);

        assert_eq!(item.value, "value");
        assert_eq!(item.tier, Tier::Hot);
        assert_eq!(item.shard_id, 2);
        assert!(!item.active);
    }

    #[test]
    fn test_touch_sets_active() {
        let mut item = CacheItem::new(1u32, 0);
        let before = item.last_touch;

        item.touch();

        assert!(item.active);
        assert!(item.last_touch >= before);
    }

    #[test]
    fn test_expiry_is_strictly_greater_than_ttl() {
        let item = CacheItem::new(1u32, 0);
        let now = item.last_touch + Duration::from_secs(30);

        assert!(!item.is_expired(Duration::from_secs(30), now));
        assert!(item.is_expired(Duration::from_secs(29), now));
    }

    #[test]
    fn test_idle_for_never_underflows() {
        let mut item = CacheItem::new(1u32, 0);
        let earlier = item.last_touch;
        item.last_touch += Duration::from_millis(5);

        assert_eq!(item.idle_for(earlier), Duration::ZERO);
    }

    #[test]
    fn test_tier_display_and_slots() {
        assert_eq!(Tier::Hot.to_string(), "hot");
        assert_eq!(Tier::Warm.to_string(), "warm");
        assert_eq!(Tier::Cold.to_string(), "cold");

        let slots: Vec<usize> = Tier::ALL.iter().map(|t| t.slot()).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }
}
