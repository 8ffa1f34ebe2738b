//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

use crate::cache::Tier;

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Construction parameters are unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Key object could not be turned into a cache key
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// A maintenance sweep failed
    #[error("Sweep of shard {shard} ({tier}) failed: {reason}")]
    Sweep {
        shard: usize,
        tier: Tier,
        reason: String,
    },

    /// Maps and regions disagree
    #[error("Inconsistent shard state: {0}")]
    Inconsistent(String),

    /// Background maintenance could not be started
    #[error("Runtime unavailable: {0}")]
    Runtime(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::KeyDerivation(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
