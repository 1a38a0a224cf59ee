use super::block::BlockGate;
use super::quota::QuotaRegistry;
use super::types::{window_key, EngineSettings, KeyKind, RateLimitKey};
use crate::error::Result;
use crate::store::{ScoreBound, SharedStore, StoreError};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

/// Sliding window counter backed by one sorted set per key.
///
/// Every admitted request adds a member scored with the unix second at which
/// it stops counting. An evaluation first drops members whose score is already
/// in the past, then compares what is left with the key's quota.
///
/// The prune, count and insert steps are separate store calls. Two concurrent
/// evaluations of the same key may both see room and both insert, so a key can
/// briefly hold more than its quota before the block flag lands.
pub struct SlidingWindowCounter {
    store: SharedStore,
    gate: BlockGate,
    registry: Arc<QuotaRegistry>,
    lock_duration: Duration,
    address_quota: u64,
}

impl SlidingWindowCounter {
    pub fn new(store: SharedStore, registry: Arc<QuotaRegistry>, settings: &EngineSettings) -> Self {
        Self {
            gate: BlockGate::new(store.clone(), settings.block_duration),
            store,
            registry,
            lock_duration: settings.lock_duration,
            address_quota: settings.address_quota,
        }
    }

    /// Evaluate one request for `key`, returning whether its quota is exceeded.
    ///
    /// An admitted request is recorded in the window. A rejected one blocks
    /// the key for the block duration.
    pub async fn evaluate(&self, key: &RateLimitKey) -> Result<bool> {
        let identifier = key.identifier.as_str();

        if self.gate.is_key_blocked(identifier).await? {
            debug!(key = %identifier, "Key is blocked");
            return Ok(true);
        }

        let window = window_key(identifier);
        let now = unix_now();

        not_found_as_zero(
            self.store
                .remove_range_by_score(&window, ScoreBound::NegInfinity, ScoreBound::Value(now as f64))
                .await,
        )?;

        let count = not_found_as_zero(self.store.cardinality(&window).await)?;

        let limit = match key.kind {
            KeyKind::Token => self.registry.fetch_quota(identifier).await?,
            KeyKind::Address => self.address_quota,
        };

        if count < limit {
            let expires_at = now + self.lock_duration.as_secs();
            self.store
                .add_scored(&window, &[(expires_at as f64, unique_member())])
                .await?;

            debug!(key = %identifier, count = count + 1, limit, "Request admitted");
            return Ok(false);
        }

        self.gate.block_key(identifier).await?;
        warn!(key = %identifier, count, limit, "Rate limit exceeded, key blocked");

        Ok(true)
    }

    /// Number of live entries in the window of `key` (for testing/monitoring)
    pub async fn window_count(&self, key: &str) -> Result<u64> {
        let window = window_key(key);
        not_found_as_zero(
            self.store
                .remove_range_by_score(
                    &window,
                    ScoreBound::NegInfinity,
                    ScoreBound::Value(unix_now() as f64),
                )
                .await,
        )?;
        not_found_as_zero(self.store.cardinality(&window).await)
    }

    pub fn block_gate(&self) -> &BlockGate {
        &self.gate
    }
}

/// An absent window is an empty window
fn not_found_as_zero(result: std::result::Result<u64, StoreError>) -> Result<u64> {
    match result {
        Ok(n) => Ok(n),
        Err(StoreError::NotFound(_)) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Window member for one admission: nanosecond timestamp plus a random suffix
fn unique_member() -> String {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{}-{}", nanos, Uuid::new_v4().simple())
}
