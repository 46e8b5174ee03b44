//! Backend abstraction (C3): a uniform way to obtain a [`Limiter`] for a key,
//! regardless of whether state lives in this process or in a remote store.
//!
//! [`local::LocalBackend`] and [`remote::RemoteBackend`] are the two
//! concrete backends; [`router::DualBackendRouter`] (C6) composes one of
//! each with a liveness-checked fallback policy.

pub mod local;
pub mod remote;
pub mod router;

pub use local::LocalBackend;
pub use remote::RemoteBackend;
pub use router::DualBackendRouter;

use std::sync::Arc;

use crate::algorithm::{BoxFuture, Limiter};
use crate::config::LimitConfig;
use crate::error::Result;

/// Something that can produce a [`Limiter`] for a key and report its own
/// health, independent of where the underlying state actually lives.
pub trait Backend: Send + Sync {
    /// Get or create the limiter backing `key` under `config`.
    fn get_limiter<'a>(
        &'a self,
        key: &'a str,
        config: &'a LimitConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn Limiter>>>;

    /// Cheap liveness probe; never blocks on the backend becoming healthy.
    fn is_available(&self) -> BoxFuture<'_, bool>;

    /// Drop all held state.
    fn clear(&self) -> BoxFuture<'_, Result<()>>;

    /// Count of keys currently tracked.
    fn active_count(&self) -> BoxFuture<'_, Result<u64>>;
}
