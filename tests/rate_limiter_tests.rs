use async_trait::async_trait;
use ratelimiter::error::LimiterError;
use ratelimiter::rate_limit::{EngineSettings, QuotaRegistry, RateLimiterService};
use ratelimiter::store::{Datastore, MemoryDatastore, ScoreBound, SharedStore, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    RemoveRange,
    Cardinality,
    AddScored,
    SetWithExpiry,
    Exists,
    Get,
    Set,
}

/// Memory store that can fail or stall selected operations and counts window traffic
#[derive(Default)]
struct FaultyStore {
    inner: MemoryDatastore,
    fail_on: Option<Op>,
    not_found_on: Option<Op>,
    get_delay: Option<Duration>,
    window_calls: AtomicUsize,
}

impl FaultyStore {
    fn failing(op: Op) -> Self {
        Self {
            fail_on: Some(op),
            ..Default::default()
        }
    }

    fn check(&self, op: Op, key: &str) -> Result<(), StoreError> {
        if self.fail_on == Some(op) {
            return Err(StoreError::Backend(format!("mock error on {:?}", op)));
        }
        if self.not_found_on == Some(op) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(())
    }

    fn windows_touched(&self) -> usize {
        self.window_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Datastore for FaultyStore {
    async fn remove_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64, StoreError> {
        self.window_calls.fetch_add(1, Ordering::SeqCst);
        self.check(Op::RemoveRange, key)?;
        self.inner.remove_range_by_score(key, min, max).await
    }

    async fn cardinality(&self, key: &str) -> Result<u64, StoreError> {
        self.window_calls.fetch_add(1, Ordering::SeqCst);
        self.check(Op::Cardinality, key)?;
        self.inner.cardinality(key).await
    }

    async fn add_scored(&self, key: &str, members: &[(f64, String)]) -> Result<u64, StoreError> {
        self.window_calls.fetch_add(1, Ordering::SeqCst);
        self.check(Op::AddScored, key)?;
        self.inner.add_scored(key, members).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check(Op::SetWithExpiry, key)?;
        self.inner.set_with_expiry(key, value, ttl).await
    }

    async fn exists(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check(Op::Exists, "")?;
        self.inner.exists(keys).await
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        if let Some(delay) = self.get_delay {
            sleep(delay).await;
        }
        self.check(Op::Get, key)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check(Op::Set, key)?;
        self.inner.set(key, value, ttl).await
    }
}

fn settings(tokens: &[(&str, u64)], lock: u64, block: u64, address_quota: u64) -> EngineSettings {
    EngineSettings::new(
        tokens.iter().map(|(t, l)| (t.to_string(), *l)).collect(),
        Duration::from_secs(lock),
        Duration::from_secs(block),
        address_quota,
    )
}

fn memory_service(settings: EngineSettings) -> (MemoryDatastore, RateLimiterService) {
    let store = MemoryDatastore::new();
    let service = RateLimiterService::new(Arc::new(store.clone()), settings);
    (store, service)
}

#[tokio::test]
async fn test_admission_increments_window_by_one() {
    let (store, service) = memory_service(settings(&[], 60, 60, 5));

    for expected in 1..=3 {
        assert!(!service.decide("192.168.1.1", false).await.unwrap());
        assert_eq!(
            store.cardinality("limiter:192.168.1.1").await.unwrap(),
            expected
        );
    }
}

#[tokio::test]
async fn test_quota_scenario_with_block_outliving_window() {
    // quota = 2, lock = 1s, block = 5s
    let (store, service) = memory_service(settings(&[], 1, 5, 2));
    let ip = "10.0.0.1";

    assert!(!service.decide(ip, false).await.unwrap());
    assert!(!service.decide(ip, false).await.unwrap());
    assert!(service.decide(ip, false).await.unwrap());

    assert_eq!(store.exists(&["block:10.0.0.1".to_string()]).await.unwrap(), 1);

    // Let every window entry age out; the block still governs
    sleep(Duration::from_millis(2100)).await;
    assert_eq!(store.cardinality("limiter:10.0.0.1").await.unwrap(), 2);
    assert!(service.decide(ip, false).await.unwrap());
}

#[tokio::test]
async fn test_blocked_key_skips_window() {
    let store = Arc::new(FaultyStore::default());
    let service = RateLimiterService::new(store.clone(), settings(&[], 60, 60, 1));

    assert!(!service.decide("10.0.0.2", false).await.unwrap());
    assert!(service.decide("10.0.0.2", false).await.unwrap());

    let touched = store.windows_touched();
    assert!(service.decide("10.0.0.2", false).await.unwrap());
    assert!(service.decide("10.0.0.2", false).await.unwrap());
    assert_eq!(store.windows_touched(), touched);
}

#[tokio::test]
async fn test_window_recovers_after_block_expires() {
    let (_store, service) = memory_service(settings(&[], 1, 1, 1));

    assert!(!service.decide("10.0.0.3", false).await.unwrap());
    assert!(service.decide("10.0.0.3", false).await.unwrap());

    sleep(Duration::from_millis(2100)).await;
    assert!(!service.decide("10.0.0.3", false).await.unwrap());
}

#[tokio::test]
async fn test_repeated_pruning_keeps_count() {
    let (store, service) = memory_service(settings(&[], 60, 60, 10));
    service.decide("10.0.0.4", false).await.unwrap();
    service.decide("10.0.0.4", false).await.unwrap();

    let counter = service.counter();
    assert_eq!(counter.window_count("10.0.0.4").await.unwrap(), 2);
    assert_eq!(counter.window_count("10.0.0.4").await.unwrap(), 2);

    // Entries scored in the past never count
    store
        .add_scored("limiter:10.0.0.4", &[(0.0, "ancient".to_string())])
        .await
        .unwrap();
    assert_eq!(counter.window_count("10.0.0.4").await.unwrap(), 2);
}

#[tokio::test]
async fn test_token_uses_registered_quota() {
    let (_store, service) = memory_service(settings(&[("TOKEN_1", 3)], 60, 60, 1));
    service.register_all().await.unwrap();

    // Address quota is 1, the token gets 3
    for _ in 0..3 {
        assert!(!service.decide("TOKEN_1", true).await.unwrap());
    }
    assert!(service.decide("TOKEN_1", true).await.unwrap());
}

#[tokio::test]
async fn test_unregistered_token_fails() {
    let (store, service) = memory_service(settings(&[("TOKEN_1", 3)], 60, 60, 1));

    let err = service.decide("TOKEN_1", true).await.unwrap_err();
    assert!(matches!(err, LimiterError::TokenNotRegistered(ref t) if t == "TOKEN_1"));

    // Nothing was admitted
    assert_eq!(store.cardinality("limiter:TOKEN_1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_corrupt_quota_record_fails() {
    let (store, service) = memory_service(settings(&[], 60, 60, 1));
    store
        .set("TOKEN_9", "invalid json", Duration::ZERO)
        .await
        .unwrap();

    let err = service.decide("TOKEN_9", true).await.unwrap_err();
    assert!(matches!(err, LimiterError::InvalidQuotaRecord { .. }));
}

#[tokio::test]
async fn test_address_ignores_stored_record() {
    let (store, service) = memory_service(settings(&[], 60, 60, 1));
    store
        .set("10.0.0.5", r#"{"token":"10.0.0.5","limitReq":100}"#, Duration::ZERO)
        .await
        .unwrap();

    assert!(!service.decide("10.0.0.5", false).await.unwrap());
    assert!(service.decide("10.0.0.5", false).await.unwrap());
}

#[tokio::test]
async fn test_register_all_and_quota_exists() {
    let (store, service) = memory_service(settings(&[("T1", 100)], 1, 5, 10));

    service.register_all().await.unwrap();

    assert!(service.quota_exists("T1"));
    assert!(!service.quota_exists("T2"));
    assert_eq!(
        store.get("T1").await.unwrap(),
        r#"{"token":"T1","limitReq":100}"#
    );
}

#[tokio::test]
async fn test_register_all_reports_failing_token() {
    let store: SharedStore = Arc::new(FaultyStore::failing(Op::Set));
    let registry = QuotaRegistry::new(
        store,
        HashMap::from([("custom_token".to_string(), 5)]),
        Duration::from_secs(5),
    );

    let err = registry.register_all().await.unwrap_err();
    match err {
        LimiterError::Registration { token, .. } => assert_eq!(token, "custom_token"),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_range_removal_error_propagates() {
    let service = RateLimiterService::new(
        Arc::new(FaultyStore::failing(Op::RemoveRange)),
        settings(&[], 1, 5, 3),
    );

    let result = service.decide("10.0.0.6", false).await;
    assert!(matches!(result, Err(LimiterError::Store(_))));
}

#[tokio::test]
async fn test_store_errors_propagate_from_every_step() {
    for op in [Op::Exists, Op::Cardinality, Op::AddScored] {
        let service = RateLimiterService::new(
            Arc::new(FaultyStore::failing(op)),
            settings(&[], 1, 5, 3),
        );
        assert!(
            service.decide("10.0.0.7", false).await.is_err(),
            "{:?} failure should propagate",
            op
        );
    }

    // The block write only happens once the quota is reached
    let service = RateLimiterService::new(
        Arc::new(FaultyStore::failing(Op::SetWithExpiry)),
        settings(&[], 1, 5, 1),
    );
    assert!(!service.decide("10.0.0.8", false).await.unwrap());
    assert!(service.decide("10.0.0.8", false).await.is_err());
}

#[tokio::test]
async fn test_not_found_on_prune_and_count_is_empty_window() {
    for op in [Op::RemoveRange, Op::Cardinality] {
        let store = FaultyStore {
            not_found_on: Some(op),
            ..Default::default()
        };
        let service = RateLimiterService::new(Arc::new(store), settings(&[], 1, 5, 3));
        assert!(!service.decide("10.0.0.9", false).await.unwrap());
    }
}

#[tokio::test]
async fn test_quota_lookup_has_its_own_deadline() {
    // The lookup gives up on its own bound even though the caller has none
    let store = FaultyStore {
        get_delay: Some(Duration::from_millis(300)),
        ..Default::default()
    };
    let settings = settings(&[("SLOW", 5)], 1, 5, 3)
        .with_quota_lookup_timeout(Duration::from_millis(50));
    let service = RateLimiterService::new(Arc::new(store), settings);

    let err = service.decide("SLOW", true).await.unwrap_err();
    assert!(matches!(err, LimiterError::QuotaLookupTimeout(ref t) if t == "SLOW"));
}

#[tokio::test]
async fn test_concurrent_evaluations_of_different_keys() {
    let (_store, service) = memory_service(settings(&[], 60, 60, 2));
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let ip = format!("172.16.0.{}", i);
            let first = service.decide(&ip, false).await.unwrap();
            let second = service.decide(&ip, false).await.unwrap();
            let third = service.decide(&ip, false).await.unwrap();
            (first, second, third)
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), (false, false, true));
    }
}
