use super::{check_ttl, Datastore, ScoreBound, StoreError};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;
use tracing::{debug, info};

/// Redis-backed shared store
///
/// The connection manager reconnects on its own and is cheap to clone, so every
/// call works on a private clone instead of serializing callers behind a lock.
#[derive(Clone)]
pub struct RedisDatastore {
    connection: ConnectionManager,
}

impl RedisDatastore {
    /// Connect to Redis at `redis_url`
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        info!(url = %redis_url, "Connecting to Redis");
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self { connection })
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl Datastore for RedisDatastore {
    async fn remove_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn
            .zrembyscore(key, min.to_redis_arg(), max.to_redis_arg())
            .await?;
        debug!(key, %min, %max, removed, "ZREMRANGEBYSCORE");
        Ok(removed)
    }

    async fn cardinality(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    async fn add_scored(&self, key: &str, members: &[(f64, String)]) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let added: u64 = conn.zadd_multiple(key, members).await?;
        Ok(added)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        check_ttl(ttl)?;

        let mut conn = self.connection.clone();
        // Sub-millisecond expiries round up
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = conn.pset_ex(key, value, millis).await?;
        Ok(())
    }

    async fn exists(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let count: u64 = conn.exists(keys.to_vec()).await?;
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        value.ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        if !ttl.is_zero() {
            return self.set_with_expiry(key, value, ttl).await;
        }

        let mut conn = self.connection.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }
}
