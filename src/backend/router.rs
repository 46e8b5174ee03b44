//! Dual-backend router (C6): prefers a remote backend, falls back to a
//! local one when the remote is unavailable. No cross-backend retry — a
//! request is decided by whichever backend `is_available` picked for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::algorithm::{BoxFuture, Limiter};
use crate::backend::Backend;
use crate::config::LimitConfig;
use crate::error::Result;

/// Routes each request to a remote backend when healthy, otherwise to a
/// local fallback. `using_fallback` is advisory observability, not a
/// decision input: it reflects the last routing choice made, not the
/// current one.
pub struct DualBackendRouter {
    remote: Box<dyn Backend>,
    local: Box<dyn Backend>,
    using_fallback: AtomicBool,
}

impl DualBackendRouter {
    pub fn new(remote: Box<dyn Backend>, local: Box<dyn Backend>) -> Self {
        Self { remote, local, using_fallback: AtomicBool::new(false) }
    }

    /// Whether the most recent request was served by the local fallback.
    pub fn is_using_fallback(&self) -> bool {
        self.using_fallback.load(Ordering::Relaxed)
    }

    async fn choose(&self) -> &dyn Backend {
        if self.remote.is_available().await {
            self.using_fallback.store(false, Ordering::Relaxed);
            self.remote.as_ref()
        } else {
            if !self.using_fallback.swap(true, Ordering::Relaxed) {
                warn!("remote backend unavailable, falling back to local");
            }
            self.local.as_ref()
        }
    }
}

impl Backend for DualBackendRouter {
    fn get_limiter<'a>(
        &'a self,
        key: &'a str,
        config: &'a LimitConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn Limiter>>> {
        Box::pin(async move { self.choose().await.get_limiter(key, config).await })
    }

    fn is_available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.remote.is_available().await || self.local.is_available().await })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.remote.clear().await?;
            self.local.clear().await
        })
    }

    fn active_count(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { self.choose().await.active_count().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::clock::TestClock;
    use crate::kvstore::{KVStore, MemoryStore};
    use crate::registry::LocalRegistry;

    struct UnavailableBackend;

    impl Backend for UnavailableBackend {
        fn get_limiter<'a>(
            &'a self,
            _key: &'a str,
            _config: &'a LimitConfig,
        ) -> BoxFuture<'a, Result<Arc<dyn Limiter>>> {
            Box::pin(async move { Err(crate::error::RateLimitError::BackendUnavailable) })
        }

        fn is_available(&self) -> BoxFuture<'_, bool> {
            Box::pin(async move { false })
        }

        fn clear(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move { Ok(()) })
        }

        fn active_count(&self) -> BoxFuture<'_, Result<u64>> {
            Box::pin(async move { Ok(0) })
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_local_when_remote_unavailable() {
        let clock = Arc::new(TestClock::new(0));
        let registry = LocalRegistry::with_sweep_interval(clock, 3_600_000);
        let local = Box::new(LocalBackend::new(registry));
        let remote = Box::new(UnavailableBackend);
        let router = DualBackendRouter::new(remote, local);

        let config = LimitConfig::token_bucket(5, 1.0);
        let limiter = router.get_limiter("k", &config).await.unwrap();
        assert!(limiter.try_consume(5).await);
        assert!(router.is_using_fallback());
    }

    #[tokio::test]
    async fn test_prefers_remote_when_available() {
        let clock = Arc::new(TestClock::new(0));
        let registry = LocalRegistry::with_sweep_interval(clock.clone(), 3_600_000);
        let local = Box::new(LocalBackend::new(registry));
        let store: Arc<dyn KVStore> = Arc::new(MemoryStore::new());
        let remote = Box::new(crate::backend::RemoteBackend::new(store, clock));
        let router = DualBackendRouter::new(remote, local);

        let config = LimitConfig::token_bucket(5, 1.0);
        router.get_limiter("k", &config).await.unwrap();
        assert!(!router.is_using_fallback());
    }
}
