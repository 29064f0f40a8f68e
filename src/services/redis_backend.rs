use crate::services::cache::{CacheBackend, CacheError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Redis-backed distributed cache tier
///
/// Shared across service instances; entries expire server-side via SETEX.
pub struct RedisBackend {
    // Multiplexed; each call works on its own cheap clone
    redis: ConnectionManager,
}

impl RedisBackend {
    /// Connect to Redis
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;

        Ok(Self { redis })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        // SETEX rejects a zero expiry
        let ttl_secs = ttl.as_secs().max(1);

        let mut conn = self.redis.clone();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<(), CacheError> {
        let pattern = format!("{}*", prefix);

        let mut conn = self.redis.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await?;

        if !keys.is_empty() {
            redis::cmd("DEL")
                .arg(keys)
                .query_async::<()>(&mut conn)
                .await?;
        }

        tracing::debug!("Invalidated cache pattern: {}", pattern);
        Ok(())
    }
}
