//! Shared key/value store
//!
//! The admission gate and the token authority keep their state here: rate
//! windows and revocation markers. Both only need four capabilities, so the
//! store is a narrow trait:
//! - `get` / `set_with_ttl` / `exists` for revocation markers and OTP codes
//! - `increment` for fixed-window counters
//!
//! Drivers:
//! - In-memory store (moka) - default, for single-instance deployment and tests
//! - Redis store - optional, shared by every server instance
//!
//! # Usage
//!
//! ```rust,ignore
//! use tablebook::store::create_store;
//! use tablebook::config::StoreConfig;
//!
//! let store = create_store(&StoreConfig::default()).await?;
//! store.set_with_ttl("revoked:abc", "1", Duration::from_secs(60)).await?;
//! assert!(store.exists("revoked:abc").await?);
//! ```

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{StoreConfig, StoreDriver};

pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use redis::RedisStore;

/// Result of an atomic increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Value after the increment (1 for the first hit of a window)
    pub count: u64,
    /// Time left before the counter key expires
    pub ttl: Duration,
}

/// Capability interface over the shared store
///
/// Every method is a single round trip. Implementations must make
/// `increment` atomic: the TTL is set only when the key is created, and the
/// count never resets before the key expires.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value; `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value that expires after `ttl`
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Whether a live value exists for `key`
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove a key (no-op if absent)
    async fn delete(&self, key: &str) -> Result<()>;

    /// Increment the counter at `key`, creating it with `ttl` if absent
    async fn increment(&self, key: &str, ttl: Duration) -> Result<Counter>;
}

/// Type alias for a shared store handle
pub type DynKeyValueStore = Arc<dyn KeyValueStore>;

/// Create a store instance based on configuration
///
/// # Errors
/// - Returns an error if Redis is configured but the `redis-store` feature is not enabled
/// - Returns an error if the Redis connection fails
pub async fn create_store(config: &StoreConfig) -> Result<DynKeyValueStore> {
    match config.driver {
        StoreDriver::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreDriver::Redis => {
            #[cfg(feature = "redis-store")]
            {
                let redis_url = config.redis_url.as_ref()
                    .ok_or_else(|| anyhow::anyhow!(
                        "Redis URL is required when using the redis store driver. \
                         Set 'store.redis_url' or TABLEBOOK_STORE_REDIS_URL."
                    ))?;

                let store = RedisStore::new(redis_url).await?;
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "redis-store"))]
            {
                anyhow::bail!(
                    "Redis store driver is configured but the 'redis-store' feature is not enabled. \
                     Either enable the feature with `--features redis-store` or use the 'memory' driver."
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_store() {
        let store = create_store(&StoreConfig::default()).await.unwrap();

        store.set_with_ttl("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert!(store.exists("k").await.unwrap());
    }

    #[cfg(not(feature = "redis-store"))]
    #[tokio::test]
    async fn test_create_redis_store_without_feature() {
        let config = StoreConfig {
            driver: StoreDriver::Redis,
            redis_url: Some("redis://localhost:6379".to_string()),
        };

        let err = create_store(&config).await.err().unwrap().to_string();
        assert!(err.contains("redis-store") && err.contains("feature"));
    }

    #[cfg(feature = "redis-store")]
    #[tokio::test]
    async fn test_create_redis_store_without_url() {
        let config = StoreConfig {
            driver: StoreDriver::Redis,
            redis_url: None,
        };

        let err = create_store(&config).await.err().unwrap().to_string();
        assert!(err.contains("Redis URL"));
    }
}
