//! usergate store - shared key-value state
//!
//! Revocation entries, attempt counters and block entries all live in an
//! external key-value store so every service instance sees the same view.
//! Counters rely on the store's atomic increment; expiry relies on native TTLs.

use async_trait::async_trait;
use std::time::Duration;

pub mod memory_store;
pub mod redis_store;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// True when the store could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() || e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped()
        {
            Self::Unavailable(e.to_string())
        } else {
            Self::Backend(e.to_string())
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Trait for the external key-value collaborator
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a string value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value that expires after `ttl`
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Write only if the key is absent; returns whether this call wrote it
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Re-arm the TTL of an existing key; returns false if the key is absent
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically add `delta` and return the new value.
    ///
    /// `window` is applied as the key's TTL only when the key has none yet,
    /// so repeated increments do not slide the window forward.
    async fn increment(&self, key: &str, delta: i64, window: Option<Duration>) -> Result<i64>;

    /// Set one field of a hash and (re)arm the hash's TTL
    async fn hash_set(&self, key: &str, field: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Approximate number of live keys starting with `prefix`
    async fn count_prefix(&self, prefix: &str) -> Result<u64>;

    /// Round-trip check used by readiness probes
    async fn ping(&self) -> Result<()>;
}
