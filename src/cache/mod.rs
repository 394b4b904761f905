//! 结果缓存模块：可插拔后端的键值存储，减少重复的上游调用。
//!
//! # Answer Caching Module
//!
//! A uniform key/value store with optional per-entry expiration and three
//! interchangeable backends:
//!
//! | Backend | Description |
//! |---------|-------------|
//! | [`RedisCache`] | Durable networked store, shared across instances |
//! | [`MemoryCache`] | In-process store, lost on restart |
//! | [`NullCache`] | Retains nothing; disables caching |
//!
//! [`from_settings`] picks exactly one backend at startup. The choice is made
//! once at the composition root and handed to the service by reference; there
//! is no ambient global, so tests can substitute any backend directly.

mod backend;
pub mod key;
mod redis;

pub use backend::{CacheBackend, CacheError, MemoryCache, NullCache, DEFAULT_MAX_ENTRIES};
pub use key::QueryKey;
pub use self::redis::RedisCache;

use crate::config::Settings;
use crate::Result;
use std::sync::Arc;

/// Select the cache backend for this process.
///
/// Order: the disable flag wins, then a configured Redis url, then the
/// in-process default. Evaluated once; the returned handle is shared by every
/// caller for the process lifetime.
pub async fn from_settings(settings: &Settings) -> Result<Arc<dyn CacheBackend>> {
    if settings.no_cache {
        tracing::info!(backend = "null", "caching disabled");
        return Ok(Arc::new(NullCache::new()));
    }
    if let Some(url) = &settings.redis_url {
        let backend = RedisCache::connect(url).await?;
        tracing::info!(backend = "redis", "cache backend selected");
        return Ok(Arc::new(backend));
    }
    tracing::info!(backend = "memory", "cache backend selected");
    Ok(Arc::new(MemoryCache::default()))
}
