//! Redis-backed cache store.
//!
//! The durable networked variant: entries survive process restarts and are
//! shared by every instance pointed at the same server. Connectivity failures
//! surface as [`CacheError::Backend`], never as silent misses.

use super::backend::{CacheBackend, CacheError};
use super::key::QueryKey;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

const DEFAULT_KEY_PREFIX: &str = "choroquery:answer:";

pub struct RedisCache {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisCache {
    /// Connect to the server at `url` (e.g., "redis://localhost:6379").
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn prefixed(&self, key: &QueryKey) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &QueryKey) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.prefixed(key)).await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &QueryKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let prefixed = self.prefixed(key);
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(prefixed, value, ttl.as_secs()).await?;
            }
            None => {
                let _: () = conn.set(prefixed, value).await?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
