//! In-process [`Backend`]: resolves limiters through a [`LocalRegistry`].

use std::sync::Arc;

use crate::algorithm::{BoxFuture, Limiter};
use crate::backend::Backend;
use crate::config::LimitConfig;
use crate::error::{ConfigError, Result};
use crate::registry::LocalRegistry;

pub struct LocalBackend {
    registry: Arc<LocalRegistry>,
}

impl LocalBackend {
    pub fn new(registry: Arc<LocalRegistry>) -> Self {
        Self { registry }
    }
}

impl Backend for LocalBackend {
    fn get_limiter<'a>(
        &'a self,
        key: &'a str,
        config: &'a LimitConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn Limiter>>> {
        Box::pin(async move {
            self.registry.get_or_create(key, config).ok_or_else(|| {
                ConfigError::InvalidComposite(
                    "COMPOSITE has no single backing limiter; use the composite engine".into(),
                )
                .into()
            })
        })
    }

    fn is_available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { true })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.registry.clear();
            Ok(())
        })
    }

    fn active_count(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { Ok(self.registry.active_count()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    #[tokio::test]
    async fn test_local_backend_creates_and_reuses() {
        let clock = Arc::new(TestClock::new(0));
        let registry = LocalRegistry::with_sweep_interval(clock, 3_600_000);
        let backend = LocalBackend::new(registry);
        let config = LimitConfig::token_bucket(5, 1.0);

        let limiter = backend.get_limiter("k", &config).await.unwrap();
        assert!(limiter.try_consume(5).await);
        assert!(!limiter.try_consume(1).await);
        assert_eq!(backend.active_count().await.unwrap(), 1);
    }
}
