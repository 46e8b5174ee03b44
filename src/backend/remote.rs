//! Distributed [`Backend`]: resolves limiters as thin wrappers over an
//! `Arc<dyn KVStore>`, one atomic script call per [`Limiter`] method.
//!
//! Held as `Arc<dyn KVStore>` rather than a generic parameter so
//! [`RemoteBackend`] itself stays a plain struct the router can box
//! alongside [`crate::backend::LocalBackend`] without either side knowing
//! the other's concrete storage type.

use std::sync::Arc;

use crate::algorithm::{BoxFuture, Limiter};
use crate::backend::Backend;
use crate::clock::Clock;
use crate::config::{Algorithm, LimitConfig};
use crate::error::{ConfigError, Result};
use crate::kvstore::KVStore;

pub struct RemoteBackend {
    store: Arc<dyn KVStore>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
}

impl RemoteBackend {
    pub fn new(store: Arc<dyn KVStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock, key_prefix: String::new() }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

impl Backend for RemoteBackend {
    fn get_limiter<'a>(
        &'a self,
        key: &'a str,
        config: &'a LimitConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn Limiter>>> {
        Box::pin(async move {
            let key = self.full_key(key);
            let limiter: Arc<dyn Limiter> = match config.algorithm {
                Algorithm::TokenBucket => Arc::new(RemoteTokenBucket {
                    store: self.store.clone(),
                    clock: self.clock.clone(),
                    key,
                    capacity: config.capacity,
                    refill_rate: config.refill_rate,
                }),
                Algorithm::FixedWindow => Arc::new(RemoteFixedWindow {
                    store: self.store.clone(),
                    clock: self.clock.clone(),
                    key,
                    capacity: config.capacity,
                    window_duration_ms: config.window_duration_ms.unwrap_or(1000),
                }),
                Algorithm::SlidingWindow => Arc::new(RemoteSlidingWindow {
                    store: self.store.clone(),
                    clock: self.clock.clone(),
                    key,
                    capacity: config.capacity,
                }),
                Algorithm::LeakyBucket => Arc::new(RemoteLeakyBucket {
                    store: self.store.clone(),
                    clock: self.clock.clone(),
                    key,
                    queue_capacity: config.capacity,
                    leak_rate_per_second: config.refill_rate,
                    max_queue_time_ms: config.max_queue_time_ms.unwrap_or(30_000),
                }),
                Algorithm::Composite => {
                    return Err(ConfigError::InvalidComposite(
                        "COMPOSITE has no single backing limiter; use the composite engine".into(),
                    )
                    .into());
                }
            };
            Ok(limiter)
        })
    }

    fn is_available(&self) -> BoxFuture<'_, bool> {
        self.store.is_available()
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        let prefix = self.key_prefix.clone();
        Box::pin(async move { self.store.clear(&prefix).await })
    }

    fn active_count(&self) -> BoxFuture<'_, Result<u64>> {
        let prefix = self.key_prefix.clone();
        Box::pin(async move { self.store.active_count(&prefix).await })
    }
}

struct RemoteTokenBucket {
    store: Arc<dyn KVStore>,
    clock: Arc<dyn Clock>,
    key: String,
    capacity: u64,
    refill_rate: f64,
}

impl Limiter for RemoteTokenBucket {
    fn try_consume<'a>(&'a self, tokens: u64) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            // tokens == 0 is reserved by the KVStore contract as a state
            // query that always reports allowed; that convention must not
            // leak through try_consume, which denies a zero-token request.
            if tokens == 0 {
                return false;
            }
            let now = self.clock.now_ms();
            self.store
                .token_bucket_consume(&self.key, self.capacity, self.refill_rate, tokens, now)
                .await
                .map(|r| r.allowed)
                .unwrap_or(false)
        })
    }

    fn current_available<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            let now = self.clock.now_ms();
            self.store
                .token_bucket_consume(&self.key, self.capacity, self.refill_rate, 0, now)
                .await
                .map(|r| r.available as u64)
                .unwrap_or(0)
        })
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn last_update_ms<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            let now = self.clock.now_ms();
            self.store
                .token_bucket_consume(&self.key, self.capacity, self.refill_rate, 0, now)
                .await
                .map(|r| r.last_update_ms)
                .unwrap_or(now)
        })
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }
}

struct RemoteFixedWindow {
    store: Arc<dyn KVStore>,
    clock: Arc<dyn Clock>,
    key: String,
    capacity: u64,
    window_duration_ms: u64,
}

impl Limiter for RemoteFixedWindow {
    fn try_consume<'a>(&'a self, tokens: u64) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if tokens == 0 {
                return false;
            }
            let now = self.clock.now_ms();
            self.store
                .fixed_window_consume(&self.key, self.capacity, self.window_duration_ms, tokens, now)
                .await
                .map(|r| r.allowed)
                .unwrap_or(false)
        })
    }

    fn current_available<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            let now = self.clock.now_ms();
            self.store
                .fixed_window_consume(&self.key, self.capacity, self.window_duration_ms, 0, now)
                .await
                .map(|r| self.capacity.saturating_sub(r.count))
                .unwrap_or(0)
        })
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn refill_rate(&self) -> f64 {
        self.capacity as f64
    }

    fn last_update_ms<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            let now = self.clock.now_ms();
            self.store
                .fixed_window_consume(&self.key, self.capacity, self.window_duration_ms, 0, now)
                .await
                .map(|r| r.window_start_ms)
                .unwrap_or(now)
        })
    }

    fn name(&self) -> &'static str {
        "fixed_window"
    }
}

struct RemoteSlidingWindow {
    store: Arc<dyn KVStore>,
    clock: Arc<dyn Clock>,
    key: String,
    capacity: u64,
}

impl Limiter for RemoteSlidingWindow {
    fn try_consume<'a>(&'a self, tokens: u64) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if tokens == 0 {
                return false;
            }
            let now = self.clock.now_ms();
            self.store
                .sliding_window_consume(&self.key, self.capacity, tokens, now)
                .await
                .map(|r| r.allowed)
                .unwrap_or(false)
        })
    }

    fn current_available<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            let now = self.clock.now_ms();
            self.store
                .sliding_window_consume(&self.key, self.capacity, 0, now)
                .await
                .map(|r| self.capacity.saturating_sub(r.used))
                .unwrap_or(0)
        })
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn refill_rate(&self) -> f64 {
        self.capacity as f64
    }

    fn last_update_ms<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move { self.clock.now_ms() })
    }

    fn name(&self) -> &'static str {
        "sliding_window"
    }
}

struct RemoteLeakyBucket {
    store: Arc<dyn KVStore>,
    clock: Arc<dyn Clock>,
    key: String,
    queue_capacity: u64,
    leak_rate_per_second: f64,
    max_queue_time_ms: u64,
}

impl Limiter for RemoteLeakyBucket {
    fn try_consume<'a>(&'a self, tokens: u64) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if tokens == 0 {
                return false;
            }
            let now = self.clock.now_ms();
            self.store
                .leaky_bucket_consume(
                    &self.key,
                    self.queue_capacity,
                    self.leak_rate_per_second,
                    self.max_queue_time_ms,
                    tokens,
                    now,
                )
                .await
                .map(|r| r.allowed)
                .unwrap_or(false)
        })
    }

    fn current_available<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            let now = self.clock.now_ms();
            self.store
                .leaky_bucket_consume(
                    &self.key,
                    self.queue_capacity,
                    self.leak_rate_per_second,
                    self.max_queue_time_ms,
                    0,
                    now,
                )
                .await
                .map(|r| self.queue_capacity.saturating_sub(r.queue_size))
                .unwrap_or(0)
        })
    }

    fn capacity(&self) -> u64 {
        self.queue_capacity
    }

    fn refill_rate(&self) -> f64 {
        self.leak_rate_per_second
    }

    fn last_update_ms<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            let now = self.clock.now_ms();
            self.store
                .leaky_bucket_consume(
                    &self.key,
                    self.queue_capacity,
                    self.leak_rate_per_second,
                    self.max_queue_time_ms,
                    0,
                    now,
                )
                .await
                .map(|r| r.last_leak_ms)
                .unwrap_or(now)
        })
    }

    fn name(&self) -> &'static str {
        "leaky_bucket"
    }
}
