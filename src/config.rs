//! Configuration Module
//!
//! Loads stash parameters from environment variables and validates them into
//! the values the shards and crawlers are built from.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::TierSplit;
use crate::error::{CacheError, Result};

pub const MIN_NODES: usize = 1;
pub const MAX_NODES: usize = 12;
pub const MIN_CAPACITY: usize = 10;
pub const MIN_TTL_SECONDS: u64 = 30;
pub const DEFAULT_TTL_SECONDS: u64 = 240;
pub const MIN_QUEUE_SIZE: usize = 1000;

/// What to do when hot + warm exceeds half the shard capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitPolicy {
    /// Fail construction
    Reject,
    /// Use the 10/20/70 split instead
    #[default]
    Fallback,
}

impl FromStr for SplitPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(SplitPolicy::Reject),
            "fallback" => Ok(SplitPolicy::Fallback),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown split policy: {}",
                other
            ))),
        }
    }
}

/// Which eviction policy drives the background crawlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyKind {
    #[default]
    Ttl,
}

/// Stash configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct StashConfig {
    /// Number of shards
    pub nodes: usize,
    /// Total capacity, split evenly across shards
    pub capacity: usize,
    /// Share of shard capacity for the hot tier (0 = default split)
    pub hot_percent: f64,
    /// Share of shard capacity for the warm tier (0 = default split)
    pub warm_percent: f64,
    /// Idle time after which an item may be swept (0 = default)
    pub ttl_seconds: u64,
    /// Bound of the crawler work queue
    pub queue_size: usize,
    pub split_policy: SplitPolicy,
    pub policy: PolicyKind,
    /// Scheduler tick
    pub crawl_interval_ms: u64,
    /// Worker tick
    pub worker_interval_ms: u64,
    /// How long shutdown waits for in-flight sweeps
    pub shutdown_grace_ms: u64,
}

impl StashConfig {
    /// Creates a new StashConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `BYTESTASH_NODES` - Number of shards (default: 1)
    /// - `BYTESTASH_CAPACITY` - Total item capacity (default: 10000)
    /// - `BYTESTASH_HOT_PERCENT` / `BYTESTASH_WARM_PERCENT` - Tier split (default: 0, i.e. 10/20/70)
    /// - `BYTESTASH_TTL` - TTL in seconds (default: 240)
    /// - `BYTESTASH_QUEUE_SIZE` - Crawler queue bound (default: 1000)
    /// - `BYTESTASH_SPLIT_POLICY` - `reject` or `fallback` (default: fallback)
    /// - `BYTESTASH_CRAWL_INTERVAL_MS` / `BYTESTASH_WORKER_INTERVAL_MS` - Ticks (default: 1000)
    /// - `BYTESTASH_SHUTDOWN_GRACE_MS` - Shutdown grace period (default: 5000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            nodes: env_or("BYTESTASH_NODES", defaults.nodes),
            capacity: env_or("BYTESTASH_CAPACITY", defaults.capacity),
            hot_percent: env_or("BYTESTASH_HOT_PERCENT", defaults.hot_percent),
            warm_percent: env_or("BYTESTASH_WARM_PERCENT", defaults.warm_percent),
            ttl_seconds: env_or("BYTESTASH_TTL", defaults.ttl_seconds),
            queue_size: env_or("BYTESTASH_QUEUE_SIZE", defaults.queue_size),
            split_policy: env_or("BYTESTASH_SPLIT_POLICY", defaults.split_policy),
            policy: defaults.policy,
            crawl_interval_ms: env_or("BYTESTASH_CRAWL_INTERVAL_MS", defaults.crawl_interval_ms),
            worker_interval_ms: env_or(
                "BYTESTASH_WORKER_INTERVAL_MS",
                defaults.worker_interval_ms,
            ),
            shutdown_grace_ms: env_or("BYTESTASH_SHUTDOWN_GRACE_MS", defaults.shutdown_grace_ms),
        }
    }

    // == Validate ==
    /// Rejects unusable values and clamps the rest into range.
    pub fn validate(&self) -> Result<ValidatedConfig> {
        if self.nodes < MIN_NODES {
            return Err(CacheError::InvalidConfig(
                "nodes can not be 0".to_string(),
            ));
        }
        if self.capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "capacity can not be 0".to_string(),
            ));
        }
        if self.crawl_interval_ms == 0 || self.worker_interval_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "crawler intervals must be greater than 0".to_string(),
            ));
        }

        let nodes = self.nodes.min(MAX_NODES);
        // Every shard gets at least MIN_CAPACITY items.
        let capacity = self.capacity.max(MIN_CAPACITY * nodes);
        let ttl_seconds = match self.ttl_seconds {
            0 => DEFAULT_TTL_SECONDS,
            ttl => ttl.max(MIN_TTL_SECONDS),
        };
        let split = TierSplit::resolve(self.hot_percent, self.warm_percent, self.split_policy)?;

        Ok(ValidatedConfig {
            nodes,
            capacity_per_node: capacity / nodes,
            split,
            ttl: Duration::from_secs(ttl_seconds),
            queue_size: self.queue_size.max(MIN_QUEUE_SIZE),
            policy: self.policy,
            workers: nodes / 4 + 1,
            crawl_interval: Duration::from_millis(self.crawl_interval_ms),
            worker_interval: Duration::from_millis(self.worker_interval_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        })
    }
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            nodes: MIN_NODES,
            capacity: 10_000,
            hot_percent: 0.0,
            warm_percent: 0.0,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            queue_size: MIN_QUEUE_SIZE,
            split_policy: SplitPolicy::default(),
            policy: PolicyKind::default(),
            crawl_interval_ms: 1000,
            worker_interval_ms: 1000,
            shutdown_grace_ms: 5000,
        }
    }
}

/// Parameters after validation, ready to build shards and crawlers from.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub nodes: usize,
    pub capacity_per_node: usize,
    pub split: TierSplit,
    pub ttl: Duration,
    pub queue_size: usize,
    pub policy: PolicyKind,
    /// Number of node crawlers
    pub workers: usize,
    pub crawl_interval: Duration,
    pub worker_interval: Duration,
    pub shutdown_grace: Duration,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_config_default() {
        let config = StashConfig::default();
        assert_eq!(config.nodes, 1);
        assert_eq!(config.capacity, 10_000);
        assert_eq!(config.ttl_seconds, 240);
        assert_eq!(config.queue_size, 1000);
        assert_eq!(config.split_policy, SplitPolicy::Fallback);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("BYTESTASH_NODES");
        env::remove_var("BYTESTASH_CAPACITY");
        env::remove_var("BYTESTASH_TTL");
        env::remove_var("BYTESTASH_SPLIT_POLICY");

        let config = StashConfig::from_env();
        assert_eq!(config.nodes, 1);
        assert_eq!(config.capacity, 10_000);
        assert_eq!(config.ttl_seconds, 240);
        assert_eq!(config.split_policy, SplitPolicy::Fallback);
    }

    #[test]
    fn test_validate_clamps() {
        let config = StashConfig {
            nodes: 40,
            capacity: 5,
            ttl_seconds: 3,
            queue_size: 2,
            ..StashConfig::default()
        };

        let validated = assert_ok!(config.validate());
        assert_eq!(validated.nodes, MAX_NODES);
        assert_eq!(validated.capacity_per_node, MIN_CAPACITY);
        assert_eq!(validated.ttl, Duration::from_secs(MIN_TTL_SECONDS));
        assert_eq!(validated.queue_size, MIN_QUEUE_SIZE);
        assert_eq!(validated.workers, 4);
    }

    #[test]
    fn test_small_capacity_still_fills_every_node() {
        let config = StashConfig {
            nodes: 12,
            capacity: 10,
            ..StashConfig::default()
        };

        let validated = assert_ok!(config.validate());
        assert_eq!(validated.capacity_per_node, MIN_CAPACITY);
        assert_eq!(validated.split.sizes(validated.capacity_per_node), [1, 2, 7]);
    }

    #[test]
    fn test_validate_zero_ttl_uses_default() {
        let config = StashConfig {
            ttl_seconds: 0,
            ..StashConfig::default()
        };
        let validated = assert_ok!(config.validate());
        assert_eq!(validated.ttl, Duration::from_secs(DEFAULT_TTL_SECONDS));
    }

    #[test]
    fn test_validate_rejects_zero_nodes_and_capacity() {
        let no_nodes = StashConfig {
            nodes: 0,
            ..StashConfig::default()
        };
        assert!(matches!(no_nodes.validate(), Err(CacheError::InvalidConfig(_))));

        let no_capacity = StashConfig {
            capacity: 0,
            ..StashConfig::default()
        };
        assert!(matches!(no_capacity.validate(), Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_split_policy() {
        let mut config = StashConfig {
            hot_percent: 0.4,
            warm_percent: 0.4,
            split_policy: SplitPolicy::Reject,
            ..StashConfig::default()
        };
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));

        config.split_policy = SplitPolicy::Fallback;
        let validated = assert_ok!(config.validate());
        assert_eq!(validated.split, TierSplit::DEFAULT);
    }

    #[test]
    fn test_capacity_split_across_nodes() {
        let config = StashConfig {
            nodes: 4,
            capacity: 1000,
            ..StashConfig::default()
        };
        let validated = assert_ok!(config.validate());
        assert_eq!(validated.capacity_per_node, 250);
        assert_eq!(validated.workers, 2);
    }

    #[test]
    fn test_split_policy_from_str() {
        assert_eq!("Reject".parse::<SplitPolicy>().unwrap(), SplitPolicy::Reject);
        assert_eq!("fallback".parse::<SplitPolicy>().unwrap(), SplitPolicy::Fallback);
        assert!("sometimes".parse::<SplitPolicy>().is_err());
    }
}
