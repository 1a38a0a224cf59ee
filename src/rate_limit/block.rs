use super::types::block_key;
use crate::error::Result;
use crate::store::SharedStore;
use std::time::Duration;
use tracing::debug;

/// Cooldown flag per key
///
/// A block is only ever removed by its TTL. Nothing in the limiter deletes it,
/// so a blocked key stays blocked for at least the full block duration.
#[derive(Clone)]
pub struct BlockGate {
    store: SharedStore,
    block_duration: Duration,
}

impl BlockGate {
    pub fn new(store: SharedStore, block_duration: Duration) -> Self {
        Self {
            store,
            block_duration,
        }
    }

    /// Whether `key` currently carries a block flag
    pub async fn is_key_blocked(&self, key: &str) -> Result<bool> {
        let exists = self.store.exists(&[block_key(key)]).await?;
        Ok(exists == 1)
    }

    /// Block `key` for the configured block duration
    pub async fn block_key(&self, key: &str) -> Result<()> {
        debug!(key, duration_secs = self.block_duration.as_secs(), "Setting block flag");
        self.store
            .set_with_expiry(&block_key(key), "", self.block_duration)
            .await?;
        Ok(())
    }

    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }
}
