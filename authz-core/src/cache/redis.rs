use super::{CacheBackend, CacheError};
use crate::requirement::{Decision, DecisionKey};
use async_trait::async_trait;
use log::error;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use sha2::{Digest, Sha256};
use std::time::Duration;

const KEY_PREFIX: &str = "authz:decision:";

#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
    ttl_secs: u64,
}

impl RedisCache {
    /// Connects and pings the server
    pub async fn new(redis_url: &str, ttl: Duration) -> Result<Self, String> {
        let client =
            Client::open(redis_url).map_err(|err| format!("Failed to connect to Redis: {err}"))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|err| format!("Failed to create Redis connection manager: {err}"))?;

        let mut conn = conn_manager.clone();
        if let Err(err) = redis::cmd("PING").query_async::<String>(&mut conn).await {
            return Err(format!("Failed to ping Redis: {err}"));
        }

        Ok(Self {
            conn_manager,
            ttl_secs: ttl.as_secs(),
        })
    }

    /// Digest of the structured key; the display form is ambiguous when
    /// subjects or scopes contain separators.
    fn storage_key(key: &DecisionKey) -> Result<String, CacheError> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_string(key)?);
        Ok(format!("{KEY_PREFIX}{:x}", hasher.finalize()))
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn set(&self, key: &DecisionKey, decision: &Decision) -> Result<(), CacheError> {
        // SET EX rejects a zero expiry
        if self.ttl_secs == 0 {
            return Ok(());
        }
        let serialized = serde_json::to_string(decision)?;
        let storage_key = Self::storage_key(key)?;
        let mut conn = self.conn_manager.clone();

        conn.set_ex::<_, _, ()>(storage_key, serialized, self.ttl_secs)
            .await
            .map_err(|err| {
                error!("Redis error while setting key {}: {}", key, err);
                CacheError::Redis(err.to_string())
            })
    }

    async fn get(&self, key: &DecisionKey) -> Result<Option<Decision>, CacheError> {
        let storage_key = Self::storage_key(key)?;
        let mut conn = self.conn_manager.clone();

        let result: Option<String> = match conn.get(storage_key).await {
            Ok(value) => value,
            Err(err) => {
                if err.kind() == redis::ErrorKind::TypeError {
                    return Ok(None);
                }
                error!("Redis error while getting key {}: {}", key, err);
                return Err(CacheError::Redis(err.to_string()));
            }
        };

        result
            .map(|value| {
                serde_json::from_str(&value).map_err(|e| CacheError::Deserialization(e.to_string()))
            })
            .transpose()
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self.conn_manager.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(()),
            Err(err) => Err(format!("Redis health check failed: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirement::{Requirement, Verdict};
    use redis_test::server::RedisServer;

    fn get_redis_url(server: &RedisServer) -> String {
        match &server.addr {
            redis::ConnectionAddr::Tcp(host, port) => {
                format!("redis://{}:{}/", host, port)
            }
            _ => "redis://127.0.0.1:6379/".to_string(),
        }
    }

    #[test]
    fn test_storage_key_is_stable_digest() {
        let key = Requirement::decision("customers", "read").key_for("user-1");
        let stored = RedisCache::storage_key(&key).unwrap();
        assert!(stored.starts_with(KEY_PREFIX));
        assert_eq!(stored.len(), KEY_PREFIX.len() + 64);
        assert_eq!(stored, RedisCache::storage_key(&key.clone()).unwrap());

        let other = Requirement::rpt("customers", "read").key_for("user-1");
        assert_ne!(stored, RedisCache::storage_key(&other).unwrap());
    }

    #[test]
    fn test_storage_key_separates_subject_and_scope() {
        // Both render as "decision:customers#s@x@y"
        let first = Requirement::decision("customers", "s@x").key_for("y");
        let second = Requirement::decision("customers", "s").key_for("x@y");
        assert_eq!(first.to_string(), second.to_string());
        assert_ne!(
            RedisCache::storage_key(&first).unwrap(),
            RedisCache::storage_key(&second).unwrap()
        );
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_cache_operations() {
        let server = RedisServer::new();
        let cache = RedisCache::new(&get_redis_url(&server), Duration::from_secs(1))
            .await
            .unwrap();
        let key = Requirement::decision("customers", "read").key_for("user-1");
        let decision = Decision::new(Verdict::Allow, Duration::from_secs(1));

        cache.set(&key, &decision).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(decision));

        // Test expiration
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_health_check() {
        let server = RedisServer::new();
        let cache = RedisCache::new(&get_redis_url(&server), Duration::from_secs(1))
            .await
            .unwrap();

        let result = cache.health_check().await;
        assert!(result.is_ok(), "health check failed: {:?}", result);
    }
}
