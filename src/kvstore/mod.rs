//! The distributed half of each algorithm (C2): every decision executes as
//! one atomic server-side script invocation rather than a generic
//! read-modify-write split across round trips.
//!
//! [`MemoryStore`] is a genuinely atomic in-process implementation (useful
//! for tests and for running the KV-store contract without a real Redis);
//! [`RedisStore`] realizes the same contract over Redis via `redis::Script`.

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "redis")]
mod redis_store;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::{RedisConfig, RedisStore};

use crate::algorithm::BoxFuture;
use crate::error::Result;

/// Outcome of a single token-bucket atomic script invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketResult {
    pub allowed: bool,
    pub available: f64,
    pub last_update_ms: u64,
}

/// Outcome of a single fixed-window atomic script invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedWindowResult {
    pub allowed: bool,
    pub count: u64,
    pub window_start_ms: u64,
}

/// Outcome of a single sliding-window atomic script invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlidingWindowResult {
    pub allowed: bool,
    pub used: u64,
}

/// Outcome of a single leaky-bucket atomic script invocation (the
/// synchronous-approximation form; see [`crate::algorithm::LeakyBucket`] for
/// why the distributed form cannot offer the future-based `enqueue` API).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakyBucketResult {
    pub allowed: bool,
    pub queue_size: u64,
    pub last_leak_ms: u64,
}

/// A distributed key-value backend capable of executing one atomic script
/// per algorithm, enumerating keys under a prefix, and a cheap liveness
/// probe.
///
/// Every method is expressed with a boxed future so the trait stays
/// object-safe: [`crate::backend::RemoteBackend`] holds an `Arc<dyn KVStore>`
/// so the choice of Redis vs. the in-process [`MemoryStore`] is made once at
/// startup rather than threaded through every generic in the crate.
pub trait KVStore: Send + Sync + 'static {
    /// `tokens == 0` is reserved as a state query: it must not mutate state
    /// and always reports `allowed = true` (used to implement
    /// `ResolveConfig`/read-only observability without consuming).
    fn token_bucket_consume<'a>(
        &'a self,
        key: &'a str,
        capacity: u64,
        refill_rate: f64,
        tokens: u64,
        now_ms: u64,
    ) -> BoxFuture<'a, Result<TokenBucketResult>>;

    fn fixed_window_consume<'a>(
        &'a self,
        key: &'a str,
        capacity: u64,
        window_duration_ms: u64,
        tokens: u64,
        now_ms: u64,
    ) -> BoxFuture<'a, Result<FixedWindowResult>>;

    fn sliding_window_consume<'a>(
        &'a self,
        key: &'a str,
        capacity: u64,
        tokens: u64,
        now_ms: u64,
    ) -> BoxFuture<'a, Result<SlidingWindowResult>>;

    fn leaky_bucket_consume<'a>(
        &'a self,
        key: &'a str,
        queue_capacity: u64,
        leak_rate_per_second: f64,
        max_queue_time_ms: u64,
        tokens: u64,
        now_ms: u64,
    ) -> BoxFuture<'a, Result<LeakyBucketResult>>;

    /// Cheap round-trip confirming the backend is reachable.
    fn is_available(&self) -> BoxFuture<'_, bool>;

    /// Count of keys live under `prefix` (best-effort; errors are swallowed
    /// by the caller per the admin-operation error policy).
    fn active_count<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<u64>>;

    /// Delete every key under `prefix` (best-effort).
    fn clear<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<()>>;
}

pub(crate) fn ttl_for_window(window_duration_ms: u64) -> std::time::Duration {
    std::time::Duration::from_millis(window_duration_ms) + std::time::Duration::from_secs(3600)
}
