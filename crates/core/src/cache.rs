//! TTL-keyed key/value store behind one contract, with an in-process and a
//! redis backend selected by configuration. Expiry is evaluated lazily at
//! `get` time; there is no background sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{CacheBackend, CacheConfig};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis backend requires a redis_url")]
    MissingRedisUrl,
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Uniform cache contract. Callers must guarantee `close` runs on every
/// exit path of the owning service's lifetime.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn close(&self) -> Result<(), CacheError>;
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process backend. A mutex guards the map because gets also evict.
#[derive(Default)]
pub struct MemoryCache {
    store: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    async fn contains(&self, key: &str) -> bool {
        self.store.lock().await.contains_key(key)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut store = self.store.lock().await;
        let Some(entry) = store.get(key) else {
            return Ok(None);
        };
        if entry.expires_at <= Instant::now() {
            store.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry { value, expires_at: Instant::now() + ttl };
        self.store.lock().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Networked backend over a multiplexed redis connection. TTL enforcement
/// is delegated to the server via `SET ... EX`.
pub struct RedisCache {
    connection: redis::aio::MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut connection = self.connection.clone();
        let value: Option<String> = connection.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        let ttl_secs = ttl.as_secs().max(1);
        connection.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        // The multiplexed connection closes when the last clone drops.
        Ok(())
    }
}

pub async fn create_cache(config: &CacheConfig) -> Result<Arc<dyn Cache>, CacheError> {
    match config.backend {
        CacheBackend::Memory => {
            debug!(backend = "memory", "cache backend selected");
            Ok(Arc::new(MemoryCache::new()))
        }
        CacheBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or(CacheError::MissingRedisUrl)?;
            debug!(backend = "redis", "cache backend selected");
            let cache = RedisCache::connect(url).await?;
            Ok(Arc::new(cache))
        }
    }
}
