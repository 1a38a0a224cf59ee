use super::types::QuotaRecord;
use crate::error::{LimiterError, Result};
use crate::store::{SharedStore, StoreError};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Token quota registry
///
/// The configured quotas live in memory for membership checks. The store holds
/// one [`QuotaRecord`] per token, written here and read by every limiter
/// replica during evaluation.
pub struct QuotaRegistry {
    store: SharedStore,
    quotas: HashMap<String, u64>,
    lookup_timeout: Duration,
}

impl QuotaRegistry {
    pub fn new(store: SharedStore, quotas: HashMap<String, u64>, lookup_timeout: Duration) -> Self {
        Self {
            store,
            quotas,
            lookup_timeout,
        }
    }

    /// Persist the quota of a single token. The record never expires.
    pub async fn register_quota(&self, token: &str, limit: u64) -> Result<()> {
        let record = QuotaRecord::new(token, limit);
        let json = serde_json::to_string(&record).map_err(|e| {
            LimiterError::Serialization(format!("Failed to serialize quota record: {}", e))
        })?;

        self.store.set(token, &json, Duration::ZERO).await?;
        Ok(())
    }

    /// Persist every configured quota.
    ///
    /// Stops at the first failing token and reports it; records written before
    /// the failure stay in the store.
    pub async fn register_all(&self) -> Result<()> {
        for (token, limit) in &self.quotas {
            self.register_quota(token, *limit)
                .await
                .map_err(|e| LimiterError::Registration {
                    token: token.clone(),
                    source: Box::new(e),
                })?;

            let stored = self
                .store
                .get(token)
                .await
                .map_err(|e| LimiterError::Registration {
                    token: token.clone(),
                    source: Box::new(e.into()),
                })?;
            debug!(token = %token, stored = %stored, "Registered token quota");
        }

        info!("Registered {} token quotas", self.quotas.len());
        Ok(())
    }

    /// Whether `token` is one of the configured tokens (no store round-trip)
    pub fn quota_exists(&self, token: &str) -> bool {
        self.quotas.contains_key(token)
    }

    /// Read the stored quota of `token`.
    ///
    /// The lookup is bounded by its own timeout, independent of whatever
    /// deadline the caller runs under.
    pub async fn fetch_quota(&self, token: &str) -> Result<u64> {
        let raw = match tokio::time::timeout(self.lookup_timeout, self.store.get(token)).await {
            Err(_) => return Err(LimiterError::QuotaLookupTimeout(token.to_string())),
            Ok(Err(StoreError::NotFound(_))) => {
                return Err(LimiterError::TokenNotRegistered(token.to_string()))
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(raw)) => raw,
        };

        let record: QuotaRecord =
            serde_json::from_str(&raw).map_err(|source| LimiterError::InvalidQuotaRecord {
                token: token.to_string(),
                source,
            })?;

        Ok(record.limit_req)
    }

    pub fn len(&self) -> usize {
        self.quotas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }
}
