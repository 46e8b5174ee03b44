//! In-process Sliding Window (C1): a true 1-second rolling record sum, not
//! the two-bucket weighted approximation some implementations use.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::algorithm::{BoxFuture, Limiter};
use crate::clock::Clock;

const WINDOW_MS: u64 = 1000;

struct State {
    /// `(timestamp_ms, tokens)`, oldest first.
    records: VecDeque<(u64, u64)>,
    used: u64,
}

impl State {
    fn evict(&mut self, now: u64) {
        let cutoff = now.saturating_sub(WINDOW_MS);
        while let Some(&(ts, tokens)) = self.records.front() {
            if ts < cutoff {
                self.records.pop_front();
                self.used -= tokens;
            } else {
                break;
            }
        }
    }
}

/// Sums token-weighted records within the trailing 1000 ms window.
pub struct SlidingWindow {
    capacity: u64,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl SlidingWindow {
    /// Build a new sliding window limiter.
    pub fn new(capacity: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity,
            clock,
            state: Mutex::new(State {
                records: VecDeque::new(),
                used: 0,
            }),
        }
    }
}

impl Limiter for SlidingWindow {
    fn try_consume<'a>(&'a self, tokens: u64) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if tokens == 0 || tokens > self.capacity {
                return false;
            }
            let now = self.clock.now_ms();
            let mut state = self.state.lock();
            state.evict(now);
            if state.used + tokens > self.capacity {
                return false;
            }
            state.records.push_back((now, tokens));
            state.used += tokens;
            true
        })
    }

    fn current_available<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            let now = self.clock.now_ms();
            let mut state = self.state.lock();
            state.evict(now);
            self.capacity.saturating_sub(state.used)
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
            self.state
                .lock()
                .records
                .back()
                .map(|&(ts, _)| ts)
                .unwrap_or(0)
        })
    }

    fn name(&self) -> &'static str {
        "sliding_window"
    }
}
