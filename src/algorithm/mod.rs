//! In-process rate-limit algorithm primitives (token bucket, sliding window,
//! fixed window, leaky bucket).
//!
//! Each algorithm owns its state directly (guarded by a `parking_lot::Mutex`)
//! rather than going through a generic storage trait: this is the
//! single-process half of the split described for the distributed scripts in
//! [`crate::kvstore`]. Both halves implement the same [`Limiter`] contract so
//! the backend abstraction can swap between them transparently.

mod fixed_window;
mod leaky_bucket;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use std::future::Future;
use std::pin::Pin;

/// A boxed, `Send` future, used where a trait must remain object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The common contract every rate-limit algorithm exposes.
///
/// `tokens == 0` and `tokens` greater than [`Limiter::capacity`] both leave
/// state untouched and return `false`; callers never observe a partial
/// consume.
pub trait Limiter: Send + Sync {
    /// Attempt to consume `tokens`, returning whether the request is admitted.
    fn try_consume<'a>(&'a self, tokens: u64) -> BoxFuture<'a, bool>;

    /// Remaining capacity as of the last observation (the convention used
    /// throughout this crate; see the decision.rs module docs).
    fn current_available<'a>(&'a self) -> BoxFuture<'a, u64>;

    /// Configured capacity.
    fn capacity(&self) -> u64;

    /// Configured refill rate (tokens/requests per second, or per window for
    /// the windowed algorithms).
    fn refill_rate(&self) -> f64;

    /// Milliseconds since the epoch of the last state mutation.
    fn last_update_ms<'a>(&'a self) -> BoxFuture<'a, u64>;

    /// Algorithm name, for logging.
    fn name(&self) -> &'static str;
}
