//! In-memory key/value store using moka
//!
//! Provides a thread-safe in-process store with per-entry TTL. Each entry
//! carries its own deadline and the moka expiry policy reads it, so an
//! update (an increment) never extends the deadline the entry was created with.
//!
//! Plain values (revocation markers, OTP codes) and counters live in separate
//! caches. Only the counter cache is size-bounded: a flood of fresh rate-limit
//! windows can evict other windows but never a value written with
//! `set_with_ttl`, which leaves only at its deadline.
//!
//! Only suitable for a single server instance: counters and revocation
//! markers are not visible to other processes.

use super::{Counter, KeyValueStore};
use anyhow::{bail, Result};
use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use moka::Expiry;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

/// Default maximum number of live counters
const DEFAULT_MAX_CAPACITY: u64 = 100_000;

trait Deadline {
    fn expires_at(&self) -> Instant;

    fn is_live(&self) -> bool {
        self.expires_at() > Instant::now()
    }
}

#[derive(Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }
}

impl Deadline for StoredValue {
    fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

#[derive(Clone, Copy)]
struct StoredCounter {
    count: u64,
    expires_at: Instant,
}

impl Deadline for StoredCounter {
    fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

/// Expiry policy honouring each entry's own deadline
struct DeadlineExpiry<V>(PhantomData<fn() -> V>);

impl<V> DeadlineExpiry<V> {
    fn new() -> Self {
        Self(PhantomData)
    }
}

impl<V: Deadline> Expiry<String, V> for DeadlineExpiry<V> {
    fn expire_after_create(&self, _key: &String, value: &V, created_at: Instant) -> Option<Duration> {
        Some(value.expires_at().saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &V,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.expires_at().saturating_duration_since(updated_at))
    }
}

/// In-memory store using moka
pub struct MemoryStore {
    values: Cache<String, StoredValue>,
    counters: Cache<String, StoredCounter>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("values", &self.values.entry_count())
            .field("counters", &self.counters.entry_count())
            .finish()
    }
}

impl MemoryStore {
    /// Create a new store with default counter capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_CAPACITY)
    }

    /// Create a new store holding at most `max_capacity` counters
    pub fn with_capacity(max_capacity: u64) -> Self {
        let values = Cache::builder()
            .expire_after(DeadlineExpiry::<StoredValue>::new())
            .build();
        let counters = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(DeadlineExpiry::<StoredCounter>::new())
            .build();

        Self { values, counters }
    }

    async fn live_value(&self, key: &str) -> Option<StoredValue> {
        self.values.get(key).await.filter(StoredValue::is_live)
    }

    async fn live_counter(&self, key: &str) -> Option<StoredCounter> {
        self.counters.get(key).await.filter(StoredCounter::is_live)
    }

    /// Flush moka's deferred maintenance (evictions, expirations)
    #[cfg(test)]
    pub(crate) async fn run_pending_tasks(&self) {
        self.values.run_pending_tasks().await;
        self.counters.run_pending_tasks().await;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(stored) = self.live_value(key).await {
            return Ok(Some(stored.value));
        }
        Ok(self
            .live_counter(key)
            .await
            .map(|counter| counter.count.to_string()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.counters.invalidate(key).await;
        self.values
            .insert(key.to_string(), StoredValue::new(value.to_string(), ttl))
            .await;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_value(key).await.is_some() || self.live_counter(key).await.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.invalidate(key).await;
        self.counters.invalidate(key).await;
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<Counter> {
        if self.live_value(key).await.is_some() {
            bail!("Value at '{}' is not a counter", key);
        }

        // moka serializes compute calls per key; other keys are not blocked
        let result = self
            .counters
            .entry(key.to_string())
            .and_compute_with(|current| {
                let live = current
                    .map(|entry| entry.into_value())
                    .filter(StoredCounter::is_live);
                let next = match live {
                    Some(counter) => StoredCounter {
                        count: counter.count + 1,
                        expires_at: counter.expires_at,
                    },
                    None => StoredCounter {
                        count: 1,
                        expires_at: Instant::now() + ttl,
                    },
                };
                std::future::ready(Op::Put(next))
            })
            .await;

        let counter = match result {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => entry.into_value(),
            _ => bail!("Counter '{}' was not updated", key),
        };

        Ok(Counter {
            count: counter.count,
            ttl: counter.expires_at.saturating_duration_since(Instant::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert!(!store.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store.set_with_ttl("key", "value", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("key").await.unwrap(), Some("value".to_string()));
        assert!(store.exists("key").await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store = MemoryStore::new();
        store.set_with_ttl("short", "v", Duration::from_millis(50)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(!store.exists("short").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        store.set_with_ttl("key", "value", Duration::from_secs(60)).await.unwrap();
        store.delete("key").await.unwrap();
        store.delete("key").await.unwrap();

        assert!(!store.exists("key").await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_counts_within_window() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);

        for expected in 1..=4u64 {
            let counter = store.increment("hits", window).await.unwrap();
            assert_eq!(counter.count, expected);
            assert!(counter.ttl <= window);
        }
    }

    #[tokio::test]
    async fn test_increment_keeps_original_deadline() {
        let store = MemoryStore::new();

        let first = store.increment("hits", Duration::from_millis(300)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = store.increment("hits", Duration::from_millis(300)).await.unwrap();

        assert_eq!(second.count, 2);
        assert!(second.ttl < first.ttl);
    }

    #[tokio::test]
    async fn test_increment_resets_after_expiry() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(80);

        store.increment("hits", window).await.unwrap();
        store.increment("hits", window).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let counter = store.increment("hits", window).await.unwrap();
        assert_eq!(counter.count, 1);
    }

    #[tokio::test]
    async fn test_increment_non_counter_fails() {
        let store = MemoryStore::new();
        store.set_with_ttl("text", "hello", Duration::from_secs(60)).await.unwrap();

        assert!(store.increment("text", Duration::from_secs(60)).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment("shared", Duration::from_secs(60)).await.unwrap()
            }));
        }

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap().count);
        }
        counts.sort_unstable();

        assert_eq!(counts, (1..=20).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_counter_flood_keeps_stored_values() {
        let store = MemoryStore::with_capacity(50);
        store
            .set_with_ttl("revoked:jti-1", "user-1", Duration::from_secs(3600))
            .await
            .unwrap();
        store
            .set_with_ttl("otp:a@example.com", "123456", Duration::from_secs(600))
            .await
            .unwrap();

        for i in 0..5_000u32 {
            let key = format!("ratelimit:login:10.0.{}.{}", i / 256, i % 256);
            store.increment(&key, Duration::from_secs(60)).await.unwrap();
        }
        store.run_pending_tasks().await;

        assert!(store.counters.entry_count() <= 50);
        assert!(store.exists("revoked:jti-1").await.unwrap());
        assert_eq!(
            store.get("otp:a@example.com").await.unwrap(),
            Some("123456".to_string())
        );
    }

    #[tokio::test]
    async fn test_increments_on_many_keys_run_concurrently() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for key in 0..10 {
            for _ in 0..10 {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    store
                        .increment(&format!("window:{}", key), Duration::from_secs(60))
                        .await
                        .unwrap()
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for key in 0..10 {
            assert_eq!(
                store.get(&format!("window:{}", key)).await.unwrap(),
                Some("10".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_set_replaces_counter() {
        let store = MemoryStore::new();
        store.increment("key", Duration::from_secs(60)).await.unwrap();
        store.set_with_ttl("key", "value", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("key").await.unwrap(), Some("value".to_string()));
        store.delete("key").await.unwrap();
        assert!(!store.exists("key").await.unwrap());
    }
}
