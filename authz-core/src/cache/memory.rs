use super::{CacheBackend, CacheError};
use crate::requirement::{Decision, DecisionKey};
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use std::time::Duration;

#[derive(Clone)]
pub struct InMemoryCache {
    cache: MokaCache<DecisionKey, Decision>,
}

impl InMemoryCache {
    /// Initialize a new in-memory cache holding at most `capacity` decisions
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let cache = MokaCache::builder()
            .time_to_live(ttl)
            .max_capacity(capacity)
            .build();
        Self { cache }
    }

    #[cfg(test)]
    async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn set(&self, key: &DecisionKey, decision: &Decision) -> Result<(), CacheError> {
        self.cache.insert(key.clone(), decision.clone()).await;
        Ok(())
    }

    async fn get(&self, key: &DecisionKey) -> Result<Option<Decision>, CacheError> {
        Ok(self.cache.get(key).await)
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}
