//! Rate limiting module
//!
//! Distributed sliding-window rate limiting over a shared store:
//!
//! - **Sliding window**: every admitted request occupies its key's window for
//!   the lock duration
//! - **Block gate**: a key that reaches its quota is rejected outright until
//!   its block flag expires
//! - **Token quotas**: registered API tokens carry their own quota, every
//!   other key is limited by the fixed address quota
//!
//! # Example
//!
//! ```rust,no_run
//! use ratelimiter::rate_limit::{EngineSettings, RateLimiterService};
//! use ratelimiter::store::MemoryDatastore;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = EngineSettings::new(
//!         HashMap::from([("TOKEN_1".to_string(), 100)]),
//!         Duration::from_secs(1),
//!         Duration::from_secs(5),
//!         10,
//!     );
//!
//!     let service = RateLimiterService::new(Arc::new(MemoryDatastore::new()), settings);
//!     service.register_all().await.unwrap();
//!
//!     let blocked = service.decide("TOKEN_1", true).await.unwrap();
//!     assert!(!blocked);
//! }
//! ```

pub mod block;
pub mod middleware;
pub mod quota;
pub mod service;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use block::BlockGate;
pub use middleware::{rate_limit_middleware, LimitSubject, API_KEY_HEADER};
pub use quota::QuotaRegistry;
pub use service::RateLimiterService;
pub use types::{EngineSettings, KeyKind, QuotaRecord, RateLimitKey};
pub use window::SlidingWindowCounter;
