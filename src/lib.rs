//! Distributed rate-limit decision service.
//!
//! `ratelimit_decision` computes admit/deny decisions for an opaque key
//! against one of four algorithms, or a composite of several:
//!
//! - **Token Bucket** — bursty traffic, continuous refill
//! - **Sliding Window** — a true 1-second rolling record sum
//! - **Fixed Window** — epoch-aligned counters
//! - **Leaky Bucket** — a genuine FIFO admission queue drained at a constant rate
//!
//! State is shared across instances through a [`kvstore::KVStore`]
//! supporting atomic server-side scripts; [`backend::DualBackendRouter`]
//! transparently falls back to an in-process [`registry::LocalRegistry`]
//! when the remote store becomes unreachable.
//!
//! # Quick start
//!
//! ```ignore
//! use ratelimit_decision::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//!     let registry = LocalRegistry::new(clock.clone());
//!     let backend: Box<dyn Backend> = Box::new(LocalBackend::new(registry.clone()));
//!     let source = Arc::new(MemoryConfigSource::new(LimitConfig::token_bucket(100, 10.0)));
//!     let service = RateLimitService::new(backend, registry, ConfigResolver::new(source));
//!
//!     let decision = service.decide("user:123", 1).await;
//!     println!("allowed: {}", decision.is_allowed());
//! }
//! ```
//!
//! # Feature flags
//!
//! - `memory` (default): in-process [`kvstore::MemoryStore`]
//! - `redis`: [`kvstore::RedisStore`] via `deadpool-redis`
//!
//! The four algorithms and the composite engine are always compiled in;
//! only the storage backends behind [`kvstore::KVStore`] are optional.

pub mod algorithm;
pub mod backend;
pub mod clock;
pub mod composite;
pub mod config;
pub mod decision;
pub mod error;
pub mod kvstore;
pub mod manager;
pub mod registry;
pub mod resolver;

pub use backend::{Backend, DualBackendRouter, LocalBackend, RemoteBackend};
pub use clock::{Clock, SystemClock, TestClock};
pub use composite::{Composite, CompositeConfig, LimitComponent, LimitDefinition, Scope};
pub use config::{Algorithm, LimitConfig};
pub use decision::{CombinationInfo, CombinationLogic, ComponentOutcome, CompositeDecision, Decision, DecisionInfo};
pub use error::{ConfigError, ConnectionError, RateLimitError, Result, StorageError};
pub use kvstore::KVStore;
pub use manager::RateLimitService;
pub use registry::{BucketHolder, BucketHolderInfo, LocalRegistry};
pub use resolver::{ConfigResolver, ConfigSource, MemoryConfigSource};

pub use algorithm::{FixedWindow, LeakyBucket, Limiter, SlidingWindow, TokenBucket};

#[cfg(feature = "memory")]
pub use kvstore::MemoryStore;

#[cfg(feature = "redis")]
pub use kvstore::{RedisConfig, RedisStore};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::algorithm::{FixedWindow, LeakyBucket, Limiter, SlidingWindow, TokenBucket};
    pub use crate::backend::{Backend, DualBackendRouter, LocalBackend, RemoteBackend};
    pub use crate::clock::{Clock, SystemClock, TestClock};
    pub use crate::composite::{Composite, CompositeConfig, LimitComponent, LimitDefinition, Scope};
    pub use crate::config::{Algorithm, LimitConfig};
    pub use crate::decision::{CombinationLogic, CompositeDecision, Decision, DecisionInfo};
    pub use crate::error::{RateLimitError, Result};
    pub use crate::kvstore::KVStore;
    pub use crate::manager::RateLimitService;
    pub use crate::registry::{BucketHolderInfo, LocalRegistry};
    pub use crate::resolver::{ConfigResolver, ConfigSource, MemoryConfigSource};

    #[cfg(feature = "memory")]
    pub use crate::kvstore::MemoryStore;

    #[cfg(feature = "redis")]
    pub use crate::kvstore::{RedisConfig, RedisStore};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_integration_token_bucket_end_to_end() {
        use crate::prelude::*;

        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(0));
        let registry = LocalRegistry::new(clock);
        let backend: Box<dyn Backend> = Box::new(LocalBackend::new(registry.clone()));
        let source = Arc::new(MemoryConfigSource::new(LimitConfig::token_bucket(10, 2.0)));
        let service = RateLimitService::new(backend, registry, ConfigResolver::new(source));

        for _ in 0..10 {
            assert!(service.decide("user:1", 1).await.is_allowed());
        }
        let decision = service.decide("user:1", 1).await;
        assert!(decision.is_denied());
        assert_eq!(decision.info().algorithm, Some("token_bucket"));
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_integration_pattern_precedence() {
        use crate::prelude::*;

        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(0));
        let registry = LocalRegistry::new(clock);
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
}
