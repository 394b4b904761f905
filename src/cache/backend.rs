//! Cache backend trait and in-process implementations.

use super::key::QueryKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised by cache backends.
///
/// A plain miss is `Ok(None)`, never an error; these variants cover genuine
/// backend faults, which must not be conflated with misses.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("backend I/O error: {0}")]
    Backend(String),

    #[error("write rejected: {0}")]
    Rejected(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// Uniform key/value store with optional per-entry expiration.
///
/// Exactly one implementation is selected per process lifetime by
/// [`from_settings`](super::from_settings); all callers share that instance.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the stored value, or `None` when absent or expired.
    async fn get(&self, key: &QueryKey) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key`, replacing any existing entry. With a TTL
    /// the entry becomes unavailable after it elapses; without one it persists
    /// per backend policy.
    async fn set(
        &self,
        key: &QueryKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    fn name(&self) -> &'static str;
}

#[derive(Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
    last_accessed: Instant,
}

impl MemoryEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: ttl.map(|t| now + t),
            last_accessed: now,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process backend. Entries live until they expire, the process restarts,
/// or the store is full and they were the least recently touched. Not shared
/// across processes.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    max_entries: usize,
    max_value_bytes: usize,
}

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_MAX_VALUE_BYTES: usize = 1024 * 1024;

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
        }
    }

    pub fn with_max_value_bytes(mut self, bytes: usize) -> Self {
        self.max_value_bytes = bytes;
        self
    }

    fn evict_if_needed(&self, entries: &mut HashMap<String, MemoryEntry>) {
        entries.retain(|_, e| !e.is_expired());
        while entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                entries.remove(&k);
            } else {
                break;
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &QueryKey) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        if let Some(entry) = entries.get_mut(key.as_str()) {
            if entry.is_expired() {
                entries.remove(key.as_str());
                return Ok(None);
            }
            entry.last_accessed = Instant::now();
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &QueryKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if value.len() > self.max_value_bytes {
            return Err(CacheError::Rejected(format!(
                "value of {} bytes exceeds limit of {} for key \"{}\"",
                value.len(),
                self.max_value_bytes,
                key
            )));
        }
        let mut entries = self.entries.write().expect("cache lock poisoned");
        self.evict_if_needed(&mut entries);
        entries.insert(key.as_str().to_string(), MemoryEntry::new(value.to_string(), ttl));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Backend that retains nothing. `get` always misses, `set` always succeeds
/// and discards the value. Selected to disable caching entirely.
pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _: &QueryKey) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _: &QueryKey, _: &str, _: Option<Duration>) -> Result<(), CacheError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> QueryKey {
        QueryKey::from(s)
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let cache = MemoryCache::default();
        cache.set(&key("k1"), "stored", None).await.unwrap();
        assert_eq!(cache.get(&key("k1")).await.unwrap().as_deref(), Some("stored"));
    }

    #[tokio::test]
    async fn test_memory_replaces_existing_value() {
        let cache = MemoryCache::default();
        cache.set(&key("k1"), "first", None).await.unwrap();
        cache.set(&key("k1"), "second", None).await.unwrap();
        assert_eq!(cache.get(&key("k1")).await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_memory_ttl_boundary() {
        let cache = MemoryCache::default();
        cache
            .set(&key("short"), "v", Some(Duration::from_millis(40)))
            .await
            .unwrap();
        assert!(cache.get(&key("short")).await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get(&key("short")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_no_ttl_persists() {
        let cache = MemoryCache::default();
        cache.set(&key("forever"), "v", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get(&key("forever")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_rejects_oversized_value() {
        let cache = MemoryCache::new(16).with_max_value_bytes(8);
        let err = cache.set(&key("big"), "0123456789", None).await.unwrap_err();
        assert!(matches!(err, CacheError::Rejected(_)));
        assert!(cache.get(&key("big")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_evicts_least_recently_accessed() {
        let cache = MemoryCache::new(2);
        cache.set(&key("a"), "1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set(&key("b"), "2", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get(&key("a")).await.unwrap();
        cache.set(&key("c"), "3", None).await.unwrap();
        assert!(cache.get(&key("a")).await.unwrap().is_some());
        assert!(cache.get(&key("b")).await.unwrap().is_none());
        assert!(cache.get(&key("c")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_null_never_retains() {
        let cache = NullCache::new();
        cache.set(&key("k"), "v", None).await.unwrap();
        assert!(cache.get(&key("k")).await.unwrap().is_none());
        assert_eq!(cache.name(), "null");
    }
}
