//! Storage backends for evaluated decisions.

use crate::requirement::{Decision, DecisionKey};
use serde::{Deserialize, Deserializer, de};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod null;
pub mod redis;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to parse value: {0}")]
    Deserialization(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Contract shared by every decision store.
///
/// Stores only keep entries; freshness is judged by the caller against
/// [`Decision::is_expired`], so a backend may hold an entry slightly past its
/// TTL without harm.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn set(&self, key: &DecisionKey, decision: &Decision) -> Result<(), CacheError>;

    async fn get(&self, key: &DecisionKey) -> Result<Option<Decision>, CacheError>;

    /// Returns Ok(()) if healthy, or Err with a descriptive message if unhealthy.
    async fn health_check(&self) -> Result<(), String>;
}

/// Which backend keeps decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStore {
    #[default]
    InMemory,
    Redis,
    None,
}

impl FromStr for CacheStore {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in-memory" | "memory" => Ok(CacheStore::InMemory),
            "redis" => Ok(CacheStore::Redis),
            "none" => Ok(CacheStore::None),
            other => Err(CacheError::Config(format!(
                "unknown cache store '{other}', expected in-memory, redis or none"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for CacheStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(de::Error::custom)
    }
}

/// Backend selection and sizing
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub store: CacheStore,
    pub ttl: Duration,
    /// Maximum number of entries kept in memory
    pub memory_capacity: u64,
    pub redis_url: String,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            store: CacheStore::InMemory,
            ttl: Duration::from_secs(30),
            memory_capacity: 10_000,
            redis_url: String::new(),
        }
    }
}

/// Decision store chosen at runtime from configuration.
#[derive(Clone)]
pub enum Cache {
    /// In-memory cache implementation using Moka
    InMemory(memory::InMemoryCache),
    /// Redis-based cache shared across instances
    Redis(redis::RedisCache),
    /// Keeps nothing
    Null(null::NullCache),
}

#[async_trait::async_trait]
impl CacheBackend for Cache {
    async fn set(&self, key: &DecisionKey, decision: &Decision) -> Result<(), CacheError> {
        match self {
            Self::InMemory(cache) => cache.set(key, decision).await,
            Self::Redis(cache) => cache.set(key, decision).await,
            Self::Null(cache) => cache.set(key, decision).await,
        }
    }

    async fn get(&self, key: &DecisionKey) -> Result<Option<Decision>, CacheError> {
        match self {
            Self::InMemory(cache) => cache.get(key).await,
            Self::Redis(cache) => cache.get(key).await,
            Self::Null(cache) => cache.get(key).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(cache) => cache.health_check().await,
            Self::Redis(cache) => cache.health_check().await,
            Self::Null(cache) => cache.health_check().await,
        }
    }
}

/// Builds the configured decision store.
///
/// A Redis store is connected and pinged here, so a wrong URL fails startup
/// instead of the first request.
pub async fn create_cache(options: &CacheOptions) -> Result<Cache, CacheError> {
    match options.store {
        CacheStore::InMemory => Ok(Cache::InMemory(memory::InMemoryCache::new(
            options.ttl,
            options.memory_capacity,
        ))),
        CacheStore::Redis => {
            if options.redis_url.is_empty() {
                return Err(CacheError::Config(
                    "Redis URL is required for Redis cache".to_string(),
                ));
            }
            let cache = redis::RedisCache::new(&options.redis_url, options.ttl)
                .await
                .map_err(CacheError::Config)?;
            Ok(Cache::Redis(cache))
        }
        CacheStore::None => Ok(Cache::Null(null::NullCache::new())),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::requirement::{Requirement, Verdict};

    fn key(subject: &str) -> DecisionKey {
        Requirement::decision("customers", "read").key_for(subject)
    }

    #[tokio::test]
    async fn test_cache_basic_operations() {
        let cache = create_cache(&CacheOptions::default()).await.unwrap();
        let decision = Decision::new(Verdict::Allow, Duration::from_secs(60));

        cache.set(&key("user-1"), &decision).await.unwrap();
        assert_eq!(cache.get(&key("user-1")).await.unwrap(), Some(decision));
        assert_eq!(cache.get(&key("user-2")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_none_store() {
        let options = CacheOptions {
            store: CacheStore::None,
            ..Default::default()
        };
        let cache = create_cache(&options).await.unwrap();
        assert!(matches!(cache, Cache::Null(_)));
    }

    #[tokio::test]
    async fn test_redis_store_requires_url() {
        let options = CacheOptions {
            store: CacheStore::Redis,
            ..Default::default()
        };
        let result = create_cache(&options).await;
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_store_names() {
        let store: CacheStore = serde_json::from_str("\"in-memory\"").unwrap();
        assert_eq!(store, CacheStore::InMemory);
        let store: CacheStore = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(store, CacheStore::None);
        assert!(serde_json::from_str::<CacheStore>("\"memcached\"").is_err());

        assert_eq!("Redis".parse::<CacheStore>().unwrap(), CacheStore::Redis);
        assert!("memcached".parse::<CacheStore>().is_err());
    }
}
