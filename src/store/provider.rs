//! Store provider with enum dispatch
//!
//! Consumers hold a `StoreProvider` and get whichever backend configuration
//! selected, without vtables.

use super::memory::MemoryStore;
use super::traits::KeyValueStore;
use crate::config::{StoreBackend, StoreSettings};
use crate::error::{CacheError, CacheResult};
use std::time::Duration;
use tracing::info;

#[cfg(feature = "redis-store")]
use super::redis::RedisStore;

/// Backing store selected at startup
#[derive(Debug, Clone)]
pub enum StoreProvider {
    /// Redis/Dragonfly store (boxed to reduce enum size)
    #[cfg(feature = "redis-store")]
    Redis(Box<RedisStore>),

    /// In-process store
    Memory(MemoryStore),
}

impl StoreProvider {
    /// Build the configured backend
    ///
    /// A guard cannot coordinate without a real store, so connection failures
    /// are returned rather than degraded to a no-op backend.
    pub async fn from_config(config: &StoreSettings) -> CacheResult<Self> {
        match config.backend {
            StoreBackend::Redis => Self::create_redis(config).await,
            StoreBackend::Memory => {
                info!(backend = "memory", "In-process cache store initialized");
                Ok(Self::Memory(MemoryStore::new()))
            }
        }
    }

    #[cfg(feature = "redis-store")]
    async fn create_redis(config: &StoreSettings) -> CacheResult<Self> {
        let redis_settings = config.redis.as_ref().ok_or_else(|| {
            CacheError::store("connect", "redis backend selected but [store.redis] is missing")
        })?;

        let store = RedisStore::from_config(redis_settings).await?;
        info!(backend = "redis", "Distributed cache store initialized");
        Ok(Self::Redis(Box::new(store)))
    }

    #[cfg(not(feature = "redis-store"))]
    async fn create_redis(_config: &StoreSettings) -> CacheResult<Self> {
        Err(CacheError::store(
            "connect",
            "redis backend requested but the 'redis-store' feature is not enabled",
        ))
    }

    /// Wrap an existing in-process store
    pub fn memory(store: MemoryStore) -> Self {
        Self::Memory(store)
    }
}

impl KeyValueStore for StoreProvider {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.set(key, value, ttl).await,
            Self::Memory(s) => s.set(key, value, ttl).await,
        }
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.set_if_absent(key, value, ttl).await,
            Self::Memory(s) => s.set_if_absent(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.delete(key).await,
            Self::Memory(s) => s.delete(key).await,
        }
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.increment_with_expiry(key, ttl).await,
            Self::Memory(s) => s.increment_with_expiry(key, ttl).await,
        }
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.increment(key).await,
            Self::Memory(s) => s.increment(key).await,
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.expire(key, ttl).await,
            Self::Memory(s) => s.expire(key, ttl).await,
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.health_check().await,
            Self::Memory(s) => s.health_check().await,
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.provider_name(),
            Self::Memory(s) => s.provider_name(),
        }
    }

    fn is_distributed(&self) -> bool {
        match self {
            #[cfg(feature = "redis-store")]
            Self::Redis(s) => s.is_distributed(),
            Self::Memory(s) => s.is_distributed(),
        }
    }
}
