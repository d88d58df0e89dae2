//! Redis key/value store
//!
//! Shared store for multi-instance deployments: every server process sees the
//! same rate windows and revocation markers.
//!
//! # Features
//! - TTL via `SET ... PX`
//! - Fixed-window counters as one atomic `MULTI` pipeline:
//!   `SET key 0 PX ttl NX`, `INCR key`, `PTTL key`.
//!   The `NX` guard applies the TTL once per window; `INCR` keeps it.

use super::{Counter, KeyValueStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// Redis store implementation
pub struct RedisStore {
    /// Multiplexed connection for async operations
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .context("Failed to create Redis client")?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        Ok(Self { connection })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(key)
            .await
            .context("Failed to get value from Redis")
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .context("Failed to set value in Redis")?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        conn.exists(key)
            .await
            .context("Failed to check key in Redis")
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(key)
            .await
            .context("Failed to delete key from Redis")?;
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<Counter> {
        let mut conn = self.connection.clone();

        let (count, pttl): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("SET").arg(key).arg(0).arg("PX").arg(ttl_millis(ttl)).arg("NX")
            .ignore()
            .incr(key, 1)
            .pttl(key)
            .query_async(&mut conn)
            .await
            .context("Failed to increment counter in Redis")?;

        // PTTL is negative only if the key has no expiry, which the NX guard rules out
        let remaining = if pttl > 0 {
            Duration::from_millis(pttl as u64)
        } else {
            ttl
        };

        Ok(Counter { count, ttl: remaining })
    }
}
