//! Key-value store adapter used by the stateful routers.
//!
//! The contract is deliberately small: string values, an atomic counter,
//! and per-key expiry. Keys are namespaced with a dispatcher-specific
//! prefix via [`KeyNamespace`] so several dispatchers can share one store.
//!
//! [`RedisKeyValueStore`] is the production adapter;
//! [`InMemoryKeyValueStore`] backs the test-suite and local development.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::RedisConfig;
use crate::error::KvError;

/// Minimal key-value contract: `get`/`set`/`incr`/`expire`.
///
/// `incr` must be atomic; nothing else needs cross-key coordination.
/// Adapter failures surface as [`KvError`] and are treated as route-errors
/// for the message being dispatched, never as process failures.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetches the raw value at `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Stores `value` at `key`, clearing any previous expiry.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError>;

    /// Atomically increments the integer at `key` (missing counts as 0)
    /// and returns the new value.
    async fn incr(&self, key: &str) -> Result<i64, KvError>;

    /// Sets a time-to-live on `key`. Returns false when the key is absent.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, KvError>;
}

/// Joins a dispatcher-specific prefix with key parts using `:`.
#[derive(Debug, Clone)]
pub struct KeyNamespace {
    prefix: String,
}

impl KeyNamespace {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Builds `"<prefix>:<part>:<part>..."`.
    #[must_use]
    pub fn key(&self, parts: &[&str]) -> String {
        let mut key = self.prefix.clone();
        for part in parts {
            key.push(':');
            key.push_str(part);
        }
        key
    }
}

/// Redis adapter over a multiplexed [`ConnectionManager`].
pub struct RedisKeyValueStore {
    conn: ConnectionManager,
}

impl RedisKeyValueStore {
    /// Connects using the dispatcher's `redis_config` section.
    pub async fn connect(config: &RedisConfig) -> Result<Self, KvError> {
        let client = redis::Client::open(config.url())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1i64).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        let applied: bool = conn.expire(key, seconds).await?;
        Ok(applied)
    }
}

struct KvEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// DashMap-backed store with the same observable behavior as the Redis
/// adapter, including lazily enforced expiry.
#[derive(Default)]
pub struct InMemoryKeyValueStore {
    entries: DashMap<String, KvEntry>,
    // Guards read-modify-write sequences that span entry removal (incr on
    // an expired key), which a single shard lock does not cover.
    write_lock: Mutex<()>,
}

impl InMemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining time-to-live for `key`, if one is set. Test hook.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            return None;
        }
        entry
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Removes `key` outright. Test hook for simulating eviction.
    pub fn evict(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        // The ref guard must drop before remove_if touches the same shard.
        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let _guard = self.write_lock.lock().expect("kv write lock poisoned");
        self.entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let _guard = self.write_lock.lock().expect("kv write lock poisoned");
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| KvEntry {
            value: b"0".to_vec(),
            expires_at: None,
        });
        if entry.is_expired() {
            entry.value = b"0".to_vec();
            entry.expires_at = None;
        }
        let current: i64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| KvError::NotAnInteger {
                key: key.to_string(),
            })?;
        let next = current + 1;
        entry.value = next.to_string().into_bytes();
        Ok(next)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, KvError> {
        let _guard = self.write_lock.lock().expect("kv write lock poisoned");
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_joins_with_colons() {
        let ns = KeyNamespace::new("dispatcher");
        assert_eq!(ns.key(&["round-robin"]), "dispatcher:round-robin");
        assert_eq!(ns.key(&["user", "+27831234567"]), "dispatcher:user:+27831234567");
        assert_eq!(ns.key(&["message", "m1"]), "dispatcher:message:m1");
    }

    #[tokio::test]
    async fn get_set_round_trip() {
        let kv = InMemoryKeyValueStore::new();
        assert_eq!(kv.get("k").await.expect("get"), None);
        kv.set("k", b"value").await.expect("set");
        assert_eq!(kv.get("k").await.expect("get"), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn incr_counts_from_zero() {
        let kv = InMemoryKeyValueStore::new();
        assert_eq!(kv.incr("counter").await.expect("incr"), 1);
        assert_eq!(kv.incr("counter").await.expect("incr"), 2);
        assert_eq!(kv.incr("counter").await.expect("incr"), 3);
    }

    #[tokio::test]
    async fn incr_rejects_non_integer_values() {
        let kv = InMemoryKeyValueStore::new();
        kv.set("k", b"not a number").await.expect("set");
        assert!(matches!(
            kv.incr("k").await,
            Err(KvError::NotAnInteger { .. })
        ));
    }

    #[tokio::test]
    async fn expire_requires_existing_key() {
        let kv = InMemoryKeyValueStore::new();
        assert!(!kv.expire("missing", 60).await.expect("expire"));
        kv.set("k", b"v").await.expect("set");
        assert!(kv.expire("k", 60).await.expect("expire"));
        assert!(kv.ttl("k").is_some_and(|ttl| ttl <= Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn expired_keys_read_as_absent() {
        let kv = InMemoryKeyValueStore::new();
        kv.set("k", b"v").await.expect("set");
        kv.expire("k", 0).await.expect("expire");
        assert_eq!(kv.get("k").await.expect("get"), None);
        // A fresh incr on the expired key restarts the counter.
        assert_eq!(kv.incr("k").await.expect("incr"), 1);
    }

    #[tokio::test]
    async fn set_clears_previous_expiry() {
        let kv = InMemoryKeyValueStore::new();
        kv.set("k", b"v").await.expect("set");
        kv.expire("k", 60).await.expect("expire");
        kv.set("k", b"w").await.expect("set");
        assert_eq!(kv.ttl("k"), None);
    }
}
