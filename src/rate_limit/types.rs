use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Namespace of the sorted set holding a key's admission window
pub const WINDOW_KEY_PREFIX: &str = "limiter:";
/// Namespace of a key's cooldown flag
pub const BLOCK_KEY_PREFIX: &str = "block:";

/// Default bound on a single token quota lookup
pub const DEFAULT_QUOTA_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// What a rate limit key identifies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// A registered API token with its own quota
    Token,
    /// A client network address limited by the fixed address quota
    Address,
}

/// Rate limit key components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The token string or normalized client address
    pub identifier: String,
    pub kind: KeyKind,
}

impl RateLimitKey {
    pub fn new(identifier: impl Into<String>, is_token: bool) -> Self {
        Self {
            identifier: identifier.into(),
            kind: if is_token {
                KeyKind::Token
            } else {
                KeyKind::Address
            },
        }
    }

    /// Create a token key
    pub fn token(token: impl Into<String>) -> Self {
        Self::new(token, true)
    }

    /// Create an address key
    pub fn address(address: impl Into<String>) -> Self {
        Self::new(address, false)
    }

    pub fn is_token(&self) -> bool {
        self.kind == KeyKind::Token
    }

    /// Store key of the admission window
    pub fn window_key(&self) -> String {
        window_key(&self.identifier)
    }

    /// Store key of the cooldown flag
    pub fn block_key(&self) -> String {
        block_key(&self.identifier)
    }
}

pub fn window_key(identifier: &str) -> String {
    format!("{}{}", WINDOW_KEY_PREFIX, identifier)
}

pub fn block_key(identifier: &str) -> String {
    format!("{}{}", BLOCK_KEY_PREFIX, identifier)
}

/// Persisted quota of a token, stored under the token itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaRecord {
    pub token: String,
    /// Requests admitted per window
    #[serde(rename = "limitReq")]
    pub limit_req: u64,
}

impl QuotaRecord {
    pub fn new(token: impl Into<String>, limit_req: u64) -> Self {
        Self {
            token: token.into(),
            limit_req,
        }
    }
}

/// Immutable settings the engine is built with
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Token -> requests per window
    pub token_quotas: HashMap<String, u64>,
    /// How long an admitted request occupies its window
    pub lock_duration: Duration,
    /// How long a key stays blocked once it hits its quota
    pub block_duration: Duration,
    /// Quota applied to every address key
    pub address_quota: u64,
    /// Bound on a single token quota lookup, independent of the caller
    pub quota_lookup_timeout: Duration,
}

impl EngineSettings {
    pub fn new(
        token_quotas: HashMap<String, u64>,
        lock_duration: Duration,
        block_duration: Duration,
        address_quota: u64,
    ) -> Self {
        Self {
            token_quotas,
            lock_duration,
            block_duration,
            address_quota,
            quota_lookup_timeout: DEFAULT_QUOTA_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_quota_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.quota_lookup_timeout = timeout;
        self
    }
}
