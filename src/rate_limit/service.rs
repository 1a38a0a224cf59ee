use super::quota::QuotaRegistry;
use super::types::{EngineSettings, RateLimitKey};
use super::window::SlidingWindowCounter;
use crate::error::{LimiterError, Result};
use crate::store::SharedStore;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Rate limiter service: the entry point used by the HTTP layer
pub struct RateLimiterService {
    counter: Arc<SlidingWindowCounter>,
    registry: Arc<QuotaRegistry>,
}

impl RateLimiterService {
    /// Create a new rate limiter service over `store`
    pub fn new(store: SharedStore, settings: EngineSettings) -> Self {
        info!(
            tokens = settings.token_quotas.len(),
            lock_secs = settings.lock_duration.as_secs(),
            block_secs = settings.block_duration.as_secs(),
            address_quota = settings.address_quota,
            "Initializing rate limiter"
        );

        let registry = Arc::new(QuotaRegistry::new(
            store.clone(),
            settings.token_quotas.clone(),
            settings.quota_lookup_timeout,
        ));
        let counter = Arc::new(SlidingWindowCounter::new(store, registry.clone(), &settings));

        Self { counter, registry }
    }

    /// Decide whether a request for `key` must be rejected.
    ///
    /// Returns `Ok(true)` when the key is blocked. Evaluation errors are logged
    /// with the key and returned; they never count as blocked or admitted.
    pub async fn decide(&self, key: &str, is_token: bool) -> Result<bool> {
        let key = RateLimitKey::new(key, is_token);
        self.counter.evaluate(&key).await.map_err(|e| {
            error!(key = %key.identifier, error = %e, "Error checking rate limit");
            e
        })
    }

    /// Decide over several keys at once, e.g. a token and its client address.
    ///
    /// Each key is evaluated on its own task. The result is blocked when any
    /// key is exceeded. Errors win over any verdict and are resolved in key
    /// order, so the error of the earliest failing key is returned whatever
    /// order the tasks finish in. Dropping the returned future aborts every
    /// evaluation still in flight.
    pub async fn decide_all(&self, keys: &[RateLimitKey]) -> Result<bool> {
        let mut tasks = JoinSet::new();
        for (index, key) in keys.iter().enumerate() {
            let counter = self.counter.clone();
            let key = key.clone();
            tasks.spawn(async move { (index, counter.evaluate(&key).await) });
        }

        let mut slots: Vec<Option<Result<bool>>> = (0..keys.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) =
                joined.map_err(|e| LimiterError::Internal(format!("Evaluation task failed: {}", e)))?;
            slots[index] = Some(outcome);
        }

        let mut blocked = false;
        let mut first_error = None;
        for (key, slot) in keys.iter().zip(slots) {
            match slot {
                Some(Ok(exceeded)) => blocked |= exceeded,
                Some(Err(e)) => {
                    error!(key = %key.identifier, error = %e, "Error checking rate limit");
                    first_error.get_or_insert(e);
                }
                None => {
                    first_error.get_or_insert(LimiterError::Internal(format!(
                        "No outcome for key {}",
                        key.identifier
                    )));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(blocked),
        }
    }

    /// Whether `token` has a configured quota
    pub fn quota_exists(&self, token: &str) -> bool {
        self.registry.quota_exists(token)
    }

    /// Persist every configured token quota. Call once before serving traffic.
    pub async fn register_all(&self) -> Result<()> {
        self.registry.register_all().await
    }

    pub fn registry(&self) -> &Arc<QuotaRegistry> {
        &self.registry
    }

    pub fn counter(&self) -> &Arc<SlidingWindowCounter> {
        &self.counter
    }
}
