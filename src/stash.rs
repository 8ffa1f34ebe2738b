//! Stash Front-End
//!
//! Turns arbitrary serializable keys into opaque shard keys, routes them to
//! their shard and owns the background maintenance for all shards.

use std::any::type_name;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::cache::{CacheNode, CacheStats};
use crate::config::{StashConfig, ValidatedConfig};
use crate::error::{CacheError, Result};
use crate::tasks::{Crawlable, Maintenance, MaintenanceSettings};

// == Derived Key ==
/// Fixed-width hash of a key object and its type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    /// 64 hex characters
    pub hash: String,
    route: u64,
}

impl DerivedKey {
    /// Hashes `type_tag` followed by the JSON encoding of `key`.
    pub fn derive<K: Serialize + ?Sized>(key: &K, type_tag: &str) -> Result<Self> {
        let encoded = serde_json::to_vec(key)?;

        let mut hasher = Sha256::new();
        hasher.update(type_tag.as_bytes());
        hasher.update(&encoded);
        let digest: [u8; 32] = hasher.finalize().into();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);

        Ok(Self {
            hash: hex::encode(digest),
            route: u64::from_be_bytes(prefix),
        })
    }

    /// Shard index in `[0, shards)`.
    pub fn shard(&self, shards: usize) -> usize {
        (self.route % shards.max(1) as u64) as usize
    }
}

// == Byte Stash ==
/// A sharded tiered cache for values of type `V`.
///
/// `V` is also the type tag mixed into every key, so equal key objects used
/// with different value types never collide.
pub struct ByteStash<V> {
    nodes: Vec<Arc<CacheNode<V>>>,
    maintenance: Maintenance,
    shutdown_grace: Duration,
}

impl<V> ByteStash<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Start ==
    /// Validates `config`, builds the shards and starts background maintenance.
    /// Must be called from within a tokio runtime.
    pub fn start(config: &StashConfig) -> Result<Self> {
        Self::from_validated(config.validate()?)
    }

    /// Builds a stash from already validated parameters.
    ///
    /// The fields of [`ValidatedConfig`] are public, so the shard count and
    /// per-shard capacity are checked again here.
    pub fn from_validated(config: ValidatedConfig) -> Result<Self> {
        if config.nodes == 0 {
            return Err(CacheError::InvalidConfig(
                "nodes can not be 0".to_string(),
            ));
        }
        if config.capacity_per_node == 0 {
            return Err(CacheError::InvalidConfig(
                "capacity per node can not be 0".to_string(),
            ));
        }

        let nodes: Vec<Arc<CacheNode<V>>> = (0..config.nodes)
            .map(|index| {
                Arc::new(CacheNode::new(
                    index,
                    config.capacity_per_node,
                    config.split,
                    config.ttl,
                ))
            })
            .collect();

        let shards: Vec<Arc<dyn Crawlable>> = nodes
            .iter()
            .map(|node| Arc::clone(node) as Arc<dyn Crawlable>)
            .collect();
        let maintenance = Maintenance::start(shards, MaintenanceSettings::from_config(&config))?;

        info!(
            nodes = config.nodes,
            capacity_per_node = config.capacity_per_node,
            ttl_secs = config.ttl.as_secs(),
            "Successfully created {} cache nodes",
            config.nodes
        );

        Ok(Self {
            nodes,
            maintenance,
            shutdown_grace: config.shutdown_grace,
        })
    }

    // == Get ==
    pub fn get<K: Serialize + ?Sized>(&self, key: &K) -> Option<V> {
        let key = self.derive(key)?;
        self.node_for(&key).get(&key.hash)
    }

    // == Put ==
    /// Stores `value`. A key that cannot be derived is dropped.
    pub fn put<K: Serialize + ?Sized>(&self, key: &K, value: V) {
        if let Some(key) = self.derive(key) {
            self.node_for(&key).put(&key.hash, value);
        }
    }

    // == Remove ==
    pub fn remove<K: Serialize + ?Sized>(&self, key: &K) -> Option<V> {
        let key = self.derive(key)?;
        self.node_for(&key).remove(&key.hash)
    }

    // == Inspection ==
    pub fn shard_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: usize) -> Option<&Arc<CacheNode<V>>> {
        self.nodes.get(index)
    }

    /// Items held across all shards.
    pub fn len(&self) -> usize {
        self.nodes.iter().map(|node| node.filled()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.nodes.iter().fold(CacheStats::new(), |mut total, node| {
            total.merge(&node.stats());
            total
        })
    }

    /// Runs [`CacheNode::check_consistency`] on every shard.
    pub fn check_consistency(&self) -> Result<()> {
        self.nodes.iter().try_for_each(|node| node.check_consistency())
    }

    pub fn maintenance(&self) -> &Maintenance {
        &self.maintenance
    }

    // == Shutdown ==
    /// Stops background maintenance. The stash keeps serving requests
    /// afterwards, it just no longer expires items on its own.
    pub async fn shutdown(&self) -> bool {
        self.maintenance.shutdown(self.shutdown_grace).await
    }

    // == Internals ==
    fn derive<K: Serialize + ?Sized>(&self, key: &K) -> Option<DerivedKey> {
        match DerivedKey::derive(key, type_name::<V>()) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!("Unable to hash the key object: {}", err);
                None
            }
        }
    }

    fn node_for(&self, key: &DerivedKey) -> &CacheNode<V> {
        &self.nodes[key.shard(self.nodes.len())]
    }
}
