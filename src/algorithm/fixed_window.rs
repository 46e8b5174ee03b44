//! In-process Fixed Window (C1).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::algorithm::{BoxFuture, Limiter};
use crate::clock::Clock;

struct State {
    window_start_ms: u64,
    count: u64,
}

/// Counts admissions per `window_duration_ms`-sized, epoch-aligned window.
pub struct FixedWindow {
    capacity: u64,
    window_duration_ms: u64,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl FixedWindow {
    /// Build a new fixed window, aligned to the current epoch window.
    pub fn new(capacity: u64, window_duration_ms: u64, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        let window_start_ms = Self::align(now, window_duration_ms);
        Self {
            capacity,
            window_duration_ms,
            clock,
            state: Mutex::new(State {
                window_start_ms,
                count: 0,
            }),
        }
    }

    fn align(now: u64, window_duration_ms: u64) -> u64 {
        (now / window_duration_ms) * window_duration_ms
    }

    fn roll(&self, state: &mut State, now: u64) {
        if now.saturating_sub(state.window_start_ms) >= self.window_duration_ms {
            state.window_start_ms = Self::align(now, self.window_duration_ms);
            state.count = 0;
        }
    }
}

impl Limiter for FixedWindow {
    fn try_consume<'a>(&'a self, tokens: u64) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if tokens == 0 || tokens > self.capacity {
                return false;
            }
            let now = self.clock.now_ms();
            let mut state = self.state.lock();
            self.roll(&mut state, now);
            if state.count + tokens <= self.capacity {
                state.count += tokens;
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
            self.roll(&mut state, now);
            self.capacity.saturating_sub(state.count)
        })
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn refill_rate(&self) -> f64 {
        self.capacity as f64
    }

    fn last_update_ms<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move { self.state.lock().window_start_ms })
    }

    fn name(&self) -> &'static str {
        "fixed_window"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    #[tokio::test]
    async fn test_window_reset() {
        let clock = Arc::new(TestClock::new(0));
        let window = FixedWindow::new(5, 1000, clock.clone());

        assert!(window.try_consume(5).await);
        clock.set(999);
        assert!(!window.try_consume(1).await);
        clock.set(1000);
        assert!(window.try_consume(5).await);
    }

    #[tokio::test]
    async fn test_window_start_is_epoch_aligned() {
        let clock = Arc::new(TestClock::new(1_234_567));
        let window = FixedWindow::new(5, 1000, clock);
        assert_eq!(window.last_update_ms().await % 1000, 0);
    }

    #[tokio::test]
    async fn test_oversized_request_never_partially_consumes() {
        let clock = Arc::new(TestClock::new(0));
        let window = FixedWindow::new(5, 1000, clock);

        assert!(!window.try_consume(6).await);
        assert_eq!(window.current_available().await, 5);
    }
}
