//! Top-level facade (the core's external surface, §6): wires the router,
//! registry, and resolver together behind `Decide`/`DecideComposite` plus
//! the admin operations.

use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::Backend;
use crate::composite::{Composite, CompositeConfig, LimitComponent};
use crate::config::{Algorithm, LimitConfig};
use crate::decision::{CompositeDecision, Decision, DecisionInfo};
use crate::registry::{BucketHolderInfo, LocalRegistry};
use crate::resolver::ConfigResolver;

/// The service's single entry point: resolves config, obtains a limiter
/// through the active backend, and collapses every failure into a deny
/// (per the error-handling design, `Decide` never propagates an error).
pub struct RateLimitService {
    backend: Box<dyn Backend>,
    registry: Arc<LocalRegistry>,
    resolver: ConfigResolver,
}

impl RateLimitService {
    pub fn new(backend: Box<dyn Backend>, registry: Arc<LocalRegistry>, resolver: ConfigResolver) -> Self {
        Self { backend, registry, resolver }
    }

    /// Single-algorithm decision for `key`, consuming `tokens`.
    pub async fn decide(&self, key: &str, tokens: u64) -> Decision {
        let config = match self.resolver.resolve(key) {
            Ok(config) => config,
            Err(e) => {
                warn!(key, error = %e, "config resolution failed, denying");
                return Decision::denied(DecisionInfo::new(0, 0).with_key(key));
            }
        };

        if config.algorithm == Algorithm::Composite {
            warn!(key, "resolved config selects COMPOSITE; use decide_composite instead, denying");
            return Decision::denied(DecisionInfo::new(0, 0).with_key(key));
        }

        let limiter = match self.backend.get_limiter(key, &config).await {
            Ok(limiter) => limiter,
            Err(e) => {
                warn!(key, error = %e, "backend unavailable, denying");
                return Decision::denied(DecisionInfo::new(config.capacity, 0).with_key(key));
            }
        };

        let allowed = limiter.try_consume(tokens).await;
        let available = limiter.current_available().await;
        let mut info = DecisionInfo::new(limiter.capacity(), available)
            .with_key(key)
            .with_algorithm(limiter.name());

        if allowed {
            Decision::allowed(info)
        } else {
            if limiter.refill_rate() > 0.0 {
                let deficit = tokens.saturating_sub(available) as f64;
                let retry_after_ms = (deficit / limiter.refill_rate() * 1000.0).ceil() as u64;
                info = info.with_retry_after_ms(retry_after_ms);
            }
            Decision::denied(info)
        }
    }

    /// Composite decision across `composite_cfg`'s components. Each
    /// component's limiter is keyed `"{key}:{definition.name}"`, scoped
    /// under the caller's key so the same composite definition can be
    /// reused across many keys without collision.
    pub async fn decide_composite(&self, key: &str, tokens: u64, composite_cfg: &CompositeConfig) -> CompositeDecision {
        let mut components = Vec::with_capacity(composite_cfg.definitions.len());
        for def in &composite_cfg.definitions {
            let component_key = format!("{key}:{}", def.name);
            let config = LimitConfig {
                algorithm: def.algorithm,
                capacity: def.capacity,
                refill_rate: def.refill_rate,
                cleanup_interval_ms: LimitConfig::DEFAULT_CLEANUP_INTERVAL_MS,
                window_duration_ms: def.window_duration_ms,
                max_queue_time_ms: def.max_queue_time_ms,
            };
            let limiter = match self.backend.get_limiter(&component_key, &config).await {
                Ok(limiter) => limiter,
                Err(e) => {
                    // a component whose backend errors is treated as denied for this call.
                    warn!(key = component_key, error = %e, "composite component backend unavailable");
                    continue;
                }
            };
            components.push(
                LimitComponent::new(def.name.clone(), limiter)
                    .with_weight(def.weight)
                    .with_priority(def.priority)
                    .with_scope(def.scope.clone()),
            );
        }

        if components.is_empty() {
            return CompositeDecision::new(
                false,
                vec![],
                None,
                crate::decision::CombinationInfo { logic: composite_cfg.logic, score: None, component_scores: vec![] },
            );
        }

        Composite::new(components, composite_cfg.logic).try_consume(tokens).await
    }

    /// Current effective config for `key`, with no side effects.
    pub fn resolve_config(&self, key: &str) -> crate::error::Result<LimitConfig> {
        self.resolver.resolve(key)
    }

    pub fn set_key_config(&self, key: &str, config: LimitConfig) {
        self.resolver.set_key_config(key, config);
        self.reload();
    }

    pub fn set_pattern_config(&self, pattern: &str, config: LimitConfig) -> crate::error::Result<()> {
        self.resolver.set_pattern_config(pattern, config)?;
        self.reload();
        Ok(())
    }

    pub fn set_default_config(&self, config: LimitConfig) {
        self.resolver.set_default_config(config);
        self.reload();
    }

    pub fn remove_key_config(&self, key: &str) {
        self.resolver.remove_key_config(key);
        self.reload();
    }

    pub fn remove_pattern_config(&self, pattern: &str) {
        self.resolver.remove_pattern_config(pattern);
        self.reload();
    }

    /// Clears the resolver cache **and** the local registry, in that order,
    /// so no holder continues running against a stale config.
    pub fn reload(&self) {
        self.resolver.reload();
        self.registry.clear();
        info!("config reloaded; resolver cache and registry cleared");
    }

    /// Clears both backends and the resolver cache.
    pub async fn clear_all(&self) {
        if let Err(e) = self.backend.clear().await {
            warn!(error = %e, "clear_all: backend clear failed");
        }
        self.reload();
    }

    pub fn active_keys(&self) -> Vec<String> {
        self.registry.active_keys()
    }

    /// Owned snapshot of `key`'s holder, if tracked. Returns owned data
    /// rather than a live map reference (see [`BucketHolderInfo`]).
    pub fn bucket_holder(&self, key: &str) -> Option<BucketHolderInfo> {
        self.registry.holder(key)
    }

    /// Owned snapshot of every holder currently tracked by the registry.
    pub fn bucket_holders(&self) -> Vec<BucketHolderInfo> {
        self.registry.holders()
    }

    pub fn sweep_count(&self) -> u64 {
        self.registry.sweep_count()
    }

    pub fn last_sweep_ms(&self) -> u64 {
        self.registry.last_sweep_ms()
    }

    pub fn force_cleanup(&self) -> u64 {
        self.registry.force_cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::clock::TestClock;
    use crate::decision::CombinationLogic;
    use crate::resolver::MemoryConfigSource;

    fn service(clock: Arc<TestClock>) -> RateLimitService {
        let registry = LocalRegistry::with_sweep_interval(clock, 3_600_000);
        let backend: Box<dyn Backend> = Box::new(LocalBackend::new(registry.clone()));
        let source = Arc::new(MemoryConfigSource::new(LimitConfig::token_bucket(5, 1.0)));
        let resolver = ConfigResolver::new(source);
        RateLimitService::new(backend, registry, resolver)
    }

    #[tokio::test]
    async fn test_decide_allows_then_denies() {
        let clock = Arc::new(TestClock::new(0));
        let service = service(clock);

        for _ in 0..5 {
            assert!(service.decide("k", 1).await.is_allowed());
        }
        let decision = service.decide("k", 1).await;
        assert!(decision.is_denied());
        assert!(decision.info().retry_after_ms.is_some());
    }

    #[tokio::test]
    async fn test_reload_clears_registry_and_cache() {
        let clock = Arc::new(TestClock::new(0));
        let service = service(clock);

        service.decide("k", 5).await;
        assert_eq!(service.active_keys().len(), 1);

        service.set_key_config("k", LimitConfig::token_bucket(1, 1.0));
        assert_eq!(service.active_keys().len(), 0);

        let decision = service.decide("k", 1).await;
        assert!(decision.is_allowed());
        let decision = service.decide("k", 1).await;
        assert!(decision.is_denied());
    }

    #[tokio::test]
    async fn test_decide_composite_all_must_pass() {
        let clock = Arc::new(TestClock::new(0));
        let service = service(clock);
        let cfg = CompositeConfig::new(
            vec![
                crate::composite::LimitDefinition::new("a", Algorithm::TokenBucket, 10, 1.0),
                crate::composite::LimitDefinition::new("b", Algorithm::TokenBucket, 1, 1.0),
            ],
            CombinationLogic::AllMustPass,
        );

        let decision = service.decide_composite("k", 1, &cfg).await;
        assert!(decision.is_allowed());
        let decision = service.decide_composite("k", 1, &cfg).await;
        assert!(decision.is_denied());
        assert_eq!(decision.limiting_component(), Some("b"));
    }

    #[tokio::test]
    async fn test_bucket_holder_and_holders_return_owned_snapshots() {
        let clock = Arc::new(TestClock::new(0));
        let service = service(clock);

        assert!(service.bucket_holder("k").is_none());
        assert!(service.bucket_holders().is_empty());

        service.decide("k", 1).await;

        let holder = service.bucket_holder("k").expect("holder should exist after decide");
        assert_eq!(holder.key, "k");
        assert_eq!(holder.config.capacity, 5);

        let holders = service.bucket_holders();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].key, "k");
    }
}
