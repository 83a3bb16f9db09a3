//! TTL'd key/value cache for ephemeral trading state.
//!
//! The trading core treats the cache as an external collaborator, so the
//! interface is a trait; `MemoryCache` is the in-process implementation used
//! by default and in tests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::Result;

/// Default TTL for strategies, rules and orders
pub const TRADING_STATE_TTL: Duration = Duration::from_secs(24 * 3600);

/// Default TTL for ticker snapshots
pub const TICKER_TTL: Duration = Duration::from_secs(5 * 60);

/// Key/value cache with per-entry TTL
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-memory cache backed by a concurrent map. Expired entries are dropped
/// lazily on access and eagerly by `sweep`.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Expired: drop it so the map does not grow unbounded.
        self.entries.remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry { value, expires_at: Instant::now() + ttl },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("k", json!({"v": 1}), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"v": 1})));
        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_vanish() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn sweep_drops_only_expired() {
        let cache = MemoryCache::new();
        cache.set("old", json!(1), Duration::from_millis(5)).await.unwrap();
        cache.set("new", json!(2), Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
    }
}
