use super::{CacheBackend, CacheError};
use crate::requirement::{Decision, DecisionKey};
use async_trait::async_trait;

/// NullCache keeps nothing.
/// Used when decision caching is disabled; concurrent lookups still coalesce.
#[derive(Clone, Debug, Default)]
pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        NullCache
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn set(&self, _key: &DecisionKey, _decision: &Decision) -> Result<(), CacheError> {
        Ok(())
    }

    async fn get(&self, _key: &DecisionKey) -> Result<Option<Decision>, CacheError> {
        Ok(None)
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirement::{Requirement, Verdict};
    use std::time::Duration;

    #[tokio::test]
    async fn test_null_cache_operations() {
        let cache = NullCache::new();
        let key = Requirement::decision("customers", "read").key_for("user-1");
        let decision = Decision::new(Verdict::Allow, Duration::from_secs(60));

        assert!(cache.set(&key, &decision).await.is_ok());
        assert!(cache.get(&key).await.unwrap().is_none());
        assert!(cache.health_check().await.is_ok());
    }
}
