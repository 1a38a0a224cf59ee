//! Shared store abstraction
//!
//! The rate limiter keeps all of its state in a shared key-value store so that
//! every replica of the service sees the same windows, blocks and quotas. The
//! store must support plain values with an optional expiry and sorted sets
//! (members ordered by a numeric score, removable by score range).
//!
//! Two implementations are provided:
//!
//! - [`RedisDatastore`]: production backend over a Redis connection manager
//! - [`MemoryDatastore`]: in-process backend for tests and single-node setups
//!
//! Cancellation and deadlines are expressed the async way: callers drop the
//! returned future or wrap it in `tokio::time::timeout`.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryDatastore;
pub use self::redis::RedisDatastore;

/// Errors reported by a store backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested key does not exist
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Any other backend failure (wrong value type, closed connection, ...)
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this error only signals an absent key
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Reject a zero expiry, which Redis refuses for `SETEX`/`PSETEX`
pub(crate) fn check_ttl(ttl: Duration) -> Result<(), StoreError> {
    if ttl.is_zero() {
        return Err(StoreError::Backend(
            "invalid expire time in 'setex' command".to_string(),
        ));
    }
    Ok(())
}

/// Bound of a sorted-set score range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInfinity,
    PosInfinity,
    /// Inclusive bound
    Value(f64),
}

impl ScoreBound {
    /// Render the bound the way Redis expects it in `ZREMRANGEBYSCORE`
    pub fn to_redis_arg(&self) -> String {
        match self {
            ScoreBound::NegInfinity => "-inf".to_string(),
            ScoreBound::PosInfinity => "+inf".to_string(),
            ScoreBound::Value(v) => v.to_string(),
        }
    }

    /// Whether `score` lies at or above this bound
    pub(crate) fn admits_from_below(&self, score: f64) -> bool {
        match self {
            ScoreBound::NegInfinity => true,
            ScoreBound::PosInfinity => false,
            ScoreBound::Value(v) => score >= *v,
        }
    }

    /// Whether `score` lies at or below this bound
    pub(crate) fn admits_from_above(&self, score: f64) -> bool {
        match self {
            ScoreBound::NegInfinity => false,
            ScoreBound::PosInfinity => true,
            ScoreBound::Value(v) => score <= *v,
        }
    }
}

impl fmt::Display for ScoreBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_redis_arg())
    }
}

/// Capabilities the rate limiter needs from its backing store.
///
/// Each call is expected to be atomic on its own. Sequences of calls are not.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Remove sorted-set members whose score lies in `[min, max]`
    async fn remove_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64, StoreError>;

    /// Number of members in a sorted set (0 when the key is absent)
    async fn cardinality(&self, key: &str) -> Result<u64, StoreError>;

    /// Add `(score, member)` pairs, returning how many members were new
    async fn add_scored(&self, key: &str, members: &[(f64, String)]) -> Result<u64, StoreError>;

    /// Set a value that disappears after `ttl`
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;

    /// Count how many of `keys` exist
    async fn exists(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Read a value, failing with [`StoreError::NotFound`] when absent
    async fn get(&self, key: &str) -> Result<String, StoreError>;

    /// Write a value; a zero `ttl` means the value never expires
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
}

/// Store handle shared by every component of the limiter
pub type SharedStore = Arc<dyn Datastore>;
