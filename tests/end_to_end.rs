//! End-to-end scenarios driving the service through its public facade.

use std::sync::Arc;

use ratelimit_decision::prelude::*;

fn service_with_defaults(clock: Arc<TestClock>, default: LimitConfig) -> RateLimitService {
    let clock: Arc<dyn Clock> = clock;
    let registry = LocalRegistry::new(clock);
    let backend: Box<dyn Backend> = Box::new(LocalBackend::new(registry.clone()));
    let source = Arc::new(MemoryConfigSource::new(default));
    RateLimitService::new(backend, registry, ConfigResolver::new(source))
}

#[tokio::test]
async fn token_bucket_refill_scenario() {
    let clock = Arc::new(TestClock::new(0));
    let service = service_with_defaults(clock.clone(), LimitConfig::token_bucket(10, 2.0));

    for _ in 0..10 {
        assert!(service.decide("k", 1).await.is_allowed());
    }
    assert!(service.decide("k", 1).await.is_denied());

    clock.set(1000);
    assert!(service.decide("k", 2).await.is_allowed());
    assert!(service.decide("k", 1).await.is_denied());
}

#[tokio::test]
async fn fixed_window_reset_scenario() {
    let clock = Arc::new(TestClock::new(0));
    let service = service_with_defaults(clock.clone(), LimitConfig::fixed_window(5, 1000));

    assert!(service.decide("k", 5).await.is_allowed());
    clock.set(999);
    assert!(service.decide("k", 1).await.is_denied());
    clock.set(1000);
    assert!(service.decide("k", 5).await.is_allowed());
}

#[tokio::test]
async fn pattern_precedence_scenario() {
    let clock = Arc::new(TestClock::new(0));
    let clock_dyn: Arc<dyn Clock> = clock;
    let registry = LocalRegistry::new(clock_dyn);
    let backend: Box<dyn Backend> = Box::new(LocalBackend::new(registry.clone()));
    let source = Arc::new(MemoryConfigSource::new(LimitConfig::token_bucket(10, 1.0)));
    let resolver = ConfigResolver::new(source);
    resolver.set_pattern_config("user:*", LimitConfig::token_bucket(20, 1.0)).unwrap();
    resolver.set_key_config("user:vip", LimitConfig::token_bucket(50, 1.0));
    let service = RateLimitService::new(backend, registry, resolver);

    assert!(service.decide("user:vip", 50).await.is_allowed());
    assert!(service.decide("user:abc", 50).await.is_denied());
    assert!(service.decide("user:abc2", 20).await.is_allowed());
    assert!(service.decide("other", 20).await.is_denied());
}

/// Wraps a [`KVStore`] with a liveness switch so a test can flip the remote
/// backend from available to unavailable mid-scenario.
struct ToggleStore {
    inner: MemoryStore,
    available: std::sync::atomic::AtomicBool,
}

impl ToggleStore {
    fn new() -> Self {
        Self { inner: MemoryStore::new(), available: std::sync::atomic::AtomicBool::new(true) }
    }

    fn set_available(&self, available: bool) {
        self.available.store(available, std::sync::atomic::Ordering::SeqCst);
    }
}

impl KVStore for ToggleStore {
    fn token_bucket_consume<'a>(
        &'a self,
        key: &'a str,
        capacity: u64,
        refill_rate: f64,
        tokens: u64,
        now_ms: u64,
    ) -> ratelimit_decision::algorithm::BoxFuture<'a, ratelimit_decision::Result<ratelimit_decision::kvstore::TokenBucketResult>> {
        self.inner.token_bucket_consume(key, capacity, refill_rate, tokens, now_ms)
    }

    fn fixed_window_consume<'a>(
        &'a self,
        key: &'a str,
        capacity: u64,
        window_duration_ms: u64,
        tokens: u64,
        now_ms: u64,
    ) -> ratelimit_decision::algorithm::BoxFuture<'a, ratelimit_decision::Result<ratelimit_decision::kvstore::FixedWindowResult>> {
        self.inner.fixed_window_consume(key, capacity, window_duration_ms, tokens, now_ms)
    }

    fn sliding_window_consume<'a>(
        &'a self,
        key: &'a str,
        capacity: u64,
        tokens: u64,
        now_ms: u64,
    ) -> ratelimit_decision::algorithm::BoxFuture<'a, ratelimit_decision::Result<ratelimit_decision::kvstore::SlidingWindowResult>> {
        self.inner.sliding_window_consume(key, capacity, tokens, now_ms)
    }

    fn leaky_bucket_consume<'a>(
        &'a self,
        key: &'a str,
        queue_capacity: u64,
        leak_rate_per_second: f64,
        max_queue_time_ms: u64,
        tokens: u64,
        now_ms: u64,
    ) -> ratelimit_decision::algorithm::BoxFuture<'a, ratelimit_decision::Result<ratelimit_decision::kvstore::LeakyBucketResult>> {
        self.inner.leaky_bucket_consume(key, queue_capacity, leak_rate_per_second, max_queue_time_ms, tokens, now_ms)
    }

    fn is_available(&self) -> ratelimit_decision::algorithm::BoxFuture<'_, bool> {
        let available = self.available.load(std::sync::atomic::Ordering::SeqCst);
        Box::pin(async move { available })
    }

    fn active_count<'a>(&'a self, prefix: &'a str) -> ratelimit_decision::algorithm::BoxFuture<'a, ratelimit_decision::Result<u64>> {
        self.inner.active_count(prefix)
    }

    fn clear<'a>(&'a self, prefix: &'a str) -> ratelimit_decision::algorithm::BoxFuture<'a, ratelimit_decision::Result<()>> {
        self.inner.clear(prefix)
    }
}

#[tokio::test]
async fn fallback_behavior_scenario() {
    // remote starts available, gets exhausted, then goes unreachable: the
    // router falls back to local and the same key starts fresh there,
    // trading cross-backend consistency for liveness (§4.6, scenario 4).
    let clock = Arc::new(TestClock::new(0));
    let clock_dyn: Arc<dyn Clock> = clock;
    let registry = LocalRegistry::new(clock_dyn.clone());
    let local: Box<dyn Backend> = Box::new(LocalBackend::new(registry.clone()));
    let store = Arc::new(ToggleStore::new());
    let remote: Box<dyn Backend> = Box::new(RemoteBackend::new(store.clone(), clock_dyn));
    let router = DualBackendRouter::new(remote, local);

    let config = LimitConfig::token_bucket(10, 1.0);
    for _ in 0..10 {
        assert!(router.get_limiter("k", &config).await.unwrap().try_consume(1).await);
    }
    assert!(!router.get_limiter("k", &config).await.unwrap().try_consume(1).await);
    assert!(!router.is_using_fallback());

    store.set_available(false);

    // the same key, now served by the local fallback, starts fresh: up to
    // `capacity` calls succeed again even though the remote bucket was
    // exhausted moments ago.
    for _ in 0..10 {
        assert!(router.get_limiter("k", &config).await.unwrap().try_consume(1).await);
    }
    assert!(!router.get_limiter("k", &config).await.unwrap().try_consume(1).await);
    assert!(router.is_using_fallback());
}

#[tokio::test]
async fn composite_all_must_pass_scenario() {
    let clock = Arc::new(TestClock::new(0));
    let service = service_with_defaults(clock, LimitConfig::token_bucket(10, 1.0));

    let composite_cfg = CompositeConfig::new(
        vec![
            LimitDefinition::new("A", Algorithm::TokenBucket, 10, 1.0),
            LimitDefinition::new("B", Algorithm::FixedWindow, 5, 1.0).with_scope(Scope::Global),
        ],
        CombinationLogic::AllMustPass,
    );

    for _ in 0..5 {
        assert!(service.decide_composite("k", 1, &composite_cfg).await.is_allowed());
    }
    let decision = service.decide_composite("k", 1, &composite_cfg).await;
    assert!(decision.is_denied());
    assert_eq!(decision.limiting_component(), Some("B"));
}

#[tokio::test(start_paused = true)]
async fn leaky_bucket_shaping_scenario() {
    let clock = Arc::new(TestClock::new(0));
    let bucket = LeakyBucket::new(50, 10.0, 5000, clock.clone());

    let mut futures = Vec::new();
    for _ in 0..20 {
        futures.push(bucket.enqueue(1));
    }

    for _ in 0..25 {
        clock.advance(100);
        tokio::time::advance(std::time::Duration::from_millis(100)).await;
    }

    for fut in futures {
        assert!(fut.await);
    }
}
