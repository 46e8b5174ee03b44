//! In-process Token Bucket (C1).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::algorithm::{BoxFuture, Limiter};
use crate::clock::Clock;

struct State {
    available: f64,
    last_refill_ms: u64,
}

/// Token bucket: bursts up to `capacity`, refilling at `refill_rate` tokens
/// per second.
pub struct TokenBucket {
    capacity: u64,
    refill_rate: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl TokenBucket {
    /// Build a new bucket, starting full.
    pub fn new(capacity: u64, refill_rate: f64, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            capacity,
            refill_rate,
            clock,
            state: Mutex::new(State {
                available: capacity as f64,
                last_refill_ms: now,
            }),
        }
    }

    fn refill(&self, state: &mut State, now: u64) {
        if now <= state.last_refill_ms {
            return;
        }
        let elapsed_ms = now - state.last_refill_ms;
        let added = (elapsed_ms as f64 / 1000.0) * self.refill_rate;
        if added > 0.0 {
            state.available = (state.available + added).min(self.capacity as f64);
            state.last_refill_ms = now;
        }
    }
}

impl Limiter for TokenBucket {
    fn try_consume<'a>(&'a self, tokens: u64) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if tokens == 0 || tokens > self.capacity {
                return false;
            }
            let now = self.clock.now_ms();
            let mut state = self.state.lock();
            self.refill(&mut state, now);
            if state.available >= tokens as f64 {
                state.available -= tokens as f64;
                true
            } else {
                false
            }
        })
    }

    fn current_available<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            let now = self.clock.now_ms();
            let mut state = self.state.lock();
            self.refill(&mut state, now);
            state.available.floor() as u64
        })
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn last_update_ms<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move { self.state.lock().last_refill_ms })
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }
}
