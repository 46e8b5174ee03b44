//! Local bucket registry (C4): get-or-create map from key to limiter, with
//! a background evictor sweeping holders idle past their own
//! `cleanup_interval_ms`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;

use crate::algorithm::{FixedWindow, LeakyBucket, Limiter, SlidingWindow, TokenBucket};
use crate::clock::Clock;
use crate::config::{Algorithm, LimitConfig};

/// A tracked limiter plus the bookkeeping the evictor needs.
pub struct BucketHolder {
    pub limiter: Arc<dyn Limiter>,
    pub config: LimitConfig,
    created_ms: u64,
    last_access_ms: AtomicU64,
}

impl BucketHolder {
    pub fn created_ms(&self) -> u64 {
        self.created_ms
    }

    pub fn last_access_ms(&self) -> u64 {
        self.last_access_ms.load(Ordering::Relaxed)
    }

    fn touch(&self, now_ms: u64) {
        self.last_access_ms.store(now_ms, Ordering::Relaxed);
    }

    fn snapshot(&self, key: &str) -> BucketHolderInfo {
        BucketHolderInfo {
            key: key.to_string(),
            limiter: self.limiter.clone(),
            config: self.config,
            created_ms: self.created_ms,
            last_access_ms: self.last_access_ms(),
        }
    }
}

/// Owned admin-facing snapshot of a [`BucketHolder`]: no shard lock on the
/// registry's map is held once this value is returned.
#[derive(Clone)]
pub struct BucketHolderInfo {
    pub key: String,
    pub limiter: Arc<dyn Limiter>,
    pub config: LimitConfig,
    pub created_ms: u64,
    pub last_access_ms: u64,
}

/// Build the concrete [`Limiter`] a [`LimitConfig`] selects.
///
/// `Algorithm::Composite` has no single backing limiter; resolving one at
/// this layer is a caller error, not a legal registry key.
pub fn build_limiter(config: &LimitConfig, clock: Arc<dyn Clock>) -> Option<Arc<dyn Limiter>> {
    let limiter: Arc<dyn Limiter> = match config.algorithm {
        Algorithm::TokenBucket => Arc::new(TokenBucket::new(config.capacity, config.refill_rate, clock)),
        Algorithm::SlidingWindow => Arc::new(SlidingWindow::new(config.capacity, clock)),
        Algorithm::FixedWindow => Arc::new(FixedWindow::new(
            config.capacity,
            config.window_duration_ms.unwrap_or(1000),
            clock,
        )),
        Algorithm::LeakyBucket => Arc::new(LeakyBucket::new(
            config.capacity,
            config.refill_rate,
            config.max_queue_time_ms.unwrap_or(30_000),
            clock,
        )),
        Algorithm::Composite => return None,
    };
    Some(limiter)
}

/// Default sweep period for the background evictor.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;

/// Concurrent key -> [`BucketHolder`] map with idle eviction.
pub struct LocalRegistry {
    buckets: DashMap<String, BucketHolder>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<Notify>,
    sweep_count: AtomicU64,
    last_sweep_ms: AtomicU64,
}

impl LocalRegistry {
    /// Build a registry and spawn its background evictor at the default
    /// sweep period.
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Self::with_sweep_interval(clock, DEFAULT_SWEEP_INTERVAL_MS)
    }

    pub fn with_sweep_interval(clock: Arc<dyn Clock>, sweep_interval_ms: u64) -> Arc<Self> {
        let registry = Arc::new(Self {
            buckets: DashMap::new(),
            clock,
            shutdown: Arc::new(Notify::new()),
            sweep_count: AtomicU64::new(0),
            last_sweep_ms: AtomicU64::new(0),
        });
        spawn_evictor(registry.clone(), sweep_interval_ms);
        registry
    }

    /// Get the limiter for `key`, creating it from `config` if absent.
    /// Returns `None` for `Algorithm::Composite`, which has no single
    /// backing limiter in this registry.
    pub fn get_or_create(&self, key: &str, config: &LimitConfig) -> Option<Arc<dyn Limiter>> {
        let now = self.clock.now_ms();
        if let Some(holder) = self.buckets.get(key) {
            holder.touch(now);
            return Some(holder.limiter.clone());
        }
        let limiter = build_limiter(config, self.clock.clone())?;
        let holder = BucketHolder {
            limiter: limiter.clone(),
            config: *config,
            created_ms: now,
            last_access_ms: AtomicU64::new(now),
        };
        self.buckets.entry(key.to_string()).or_insert(holder);
        Some(limiter)
    }

    pub fn active_count(&self) -> u64 {
        self.buckets.len() as u64
    }

    pub fn active_keys(&self) -> Vec<String> {
        self.buckets.iter().map(|e| e.key().clone()).collect()
    }

    /// Owned snapshot of `key`'s holder, if present. Returns owned data
    /// rather than a `Ref` so admin callers never hold a live shard lock.
    pub fn holder(&self, key: &str) -> Option<BucketHolderInfo> {
        self.buckets.get(key).map(|h| h.snapshot(key))
    }

    /// Owned snapshot of every tracked holder.
    pub fn holders(&self) -> Vec<BucketHolderInfo> {
        self.buckets.iter().map(|e| e.value().snapshot(e.key())).collect()
    }

    pub fn clear(&self) {
        self.buckets.clear();
    }

    pub fn remove(&self, key: &str) {
        self.buckets.remove(key);
    }

    pub fn sweep_count(&self) -> u64 {
        self.sweep_count.load(Ordering::Relaxed)
    }

    pub fn last_sweep_ms(&self) -> u64 {
        self.last_sweep_ms.load(Ordering::Relaxed)
    }

    /// Evict every holder idle past its own `cleanup_interval_ms`, returning
    /// how many were removed. Exposed so admin tooling can force an
    /// out-of-band sweep without waiting for the next tick.
    pub fn force_cleanup(&self) -> u64 {
        let now = self.clock.now_ms();
        let before = self.buckets.len();
        self.buckets.retain(|_, holder| {
            now.saturating_sub(holder.last_access_ms()) < holder.config.cleanup_interval_ms
        });
        let removed = (before - self.buckets.len()) as u64;
        self.sweep_count.fetch_add(1, Ordering::Relaxed);
        self.last_sweep_ms.store(now, Ordering::Relaxed);
        removed
    }
}

impl Drop for LocalRegistry {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}

fn spawn_evictor(registry: Arc<LocalRegistry>, sweep_interval_ms: u64) {
    let shutdown = registry.shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(sweep_interval_ms)) => {
                    let removed = registry.force_cleanup();
                    if removed > 0 {
                        debug!(removed, "registry evictor swept idle buckets");
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    #[test]
    fn test_get_or_create_reuses_same_limiter() {
        let clock = Arc::new(TestClock::new(0));
        let registry = LocalRegistry::with_sweep_interval(clock, 3_600_000);
        let config = LimitConfig::token_bucket(10, 1.0);

        let a = registry.get_or_create("k", &config).unwrap();
        let b = registry.get_or_create("k", &config).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_composite_algorithm_has_no_limiter() {
        let clock = Arc::new(TestClock::new(0));
        let registry = LocalRegistry::with_sweep_interval(clock, 3_600_000);
        let config = LimitConfig { algorithm: Algorithm::Composite, ..LimitConfig::token_bucket(10, 1.0) };
        assert!(registry.get_or_create("k", &config).is_none());
    }

    #[test]
    fn test_force_cleanup_evicts_idle_holders() {
        let clock = Arc::new(TestClock::new(0));
        let registry = LocalRegistry::with_sweep_interval(clock.clone(), 3_600_000);
        let mut config = LimitConfig::token_bucket(10, 1.0);
        config.cleanup_interval_ms = 1000;
        registry.get_or_create("k", &config).unwrap();

        clock.set(2000);
        let removed = registry.force_cleanup();
        assert_eq!(removed, 1);
        assert_eq!(registry.active_count(), 0);
    }
}
