//! In-process Leaky Bucket (C1): a genuine FIFO admission queue drained at a
//! constant rate by a background task, not a virtual-level approximation.
//!
//! The drainer's clock starts "now" at construction time; if state were ever
//! reloaded from a restart this would briefly under-drain, which the design
//! accepts rather than persisting the drain timer (see the module-level
//! open-question resolution this mirrors for the distributed encoding).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tracing::debug;

use crate::algorithm::{BoxFuture, Limiter};
use crate::clock::Clock;

struct QueueItem {
    enqueue_time_ms: u64,
    tokens: u64,
    completion: Option<oneshot::Sender<bool>>,
}

struct Inner {
    queue: VecDeque<QueueItem>,
    last_leak_ms: u64,
}

/// FIFO queue leaked at `leak_rate_per_second` tokens/second.
pub struct LeakyBucket {
    queue_capacity: u64,
    leak_rate_per_second: f64,
    max_queue_time_ms: u64,
    clock: Arc<dyn Clock>,
    inner: Arc<Mutex<Inner>>,
    shutdown: Arc<Notify>,
}

impl LeakyBucket {
    /// Build a new leaky bucket and spawn its drainer and timeout sweeper.
    pub fn new(
        queue_capacity: u64,
        leak_rate_per_second: f64,
        max_queue_time_ms: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            queue: VecDeque::new(),
            last_leak_ms: clock.now_ms(),
        }));
        let shutdown = Arc::new(Notify::new());

        spawn_drainer(inner.clone(), clock.clone(), leak_rate_per_second, shutdown.clone());
        spawn_sweeper(inner.clone(), clock.clone(), max_queue_time_ms, shutdown.clone());

        Self {
            queue_capacity,
            leak_rate_per_second,
            max_queue_time_ms,
            clock,
            inner,
            shutdown,
        }
    }

    fn queue_size(inner: &Inner) -> u64 {
        inner.queue.iter().map(|item| item.tokens).sum()
    }

    /// Enqueue `tokens`, returning a future completed by the background
    /// drainer (`true`) or the timeout sweeper (`false`).
    pub fn enqueue(&self, tokens: u64) -> BoxFuture<'static, bool> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            let size = Self::queue_size(&inner);
            if tokens == 0 || size + tokens > self.queue_capacity {
                let _ = tx.send(false);
            } else {
                inner.queue.push_back(QueueItem {
                    enqueue_time_ms: self.clock.now_ms(),
                    tokens,
                    completion: Some(tx),
                });
            }
        }
        Box::pin(async move { rx.await.unwrap_or(false) })
    }
}

impl Drop for LeakyBucket {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}

fn spawn_drainer(
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
    leak_rate_per_second: f64,
    shutdown: Arc<Notify>,
) {
    let period_ms = (100.0 / leak_rate_per_second).floor().max(10.0) as u64;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(period_ms)) => {
                    let now = clock.now_ms();
                    let mut guard = inner.lock();
                    let elapsed_ms = now.saturating_sub(guard.last_leak_ms);
                    let allowed = ((elapsed_ms as f64 / 1000.0) * leak_rate_per_second).floor() as u64;
                    if allowed > 0 {
                        let mut budget = allowed;
                        let mut drained = false;
                        while let Some(front) = guard.queue.front() {
                            if front.tokens > budget {
                                break;
                            }
                            let mut item = guard.queue.pop_front().expect("front checked above");
                            budget -= item.tokens;
                            drained = true;
                            if let Some(tx) = item.completion.take() {
                                let _ = tx.send(true);
                            }
                        }
                        if drained {
                            guard.last_leak_ms = now;
                        }
                    }
                }
                _ = shutdown.notified() => {
                    debug!("leaky bucket drainer shutting down");
                    let mut guard = inner.lock();
                    for mut item in guard.queue.drain(..) {
                        if let Some(tx) = item.completion.take() {
                            let _ = tx.send(false);
                        }
                    }
                    break;
                }
            }
        }
    });
}

fn spawn_sweeper(
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
    max_queue_time_ms: u64,
    shutdown: Arc<Notify>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(1000)) => {
                    let now = clock.now_ms();
                    let mut guard = inner.lock();
                    while let Some(front) = guard.queue.front() {
                        if now.saturating_sub(front.enqueue_time_ms) <= max_queue_time_ms {
                            break;
                        }
                        let mut item = guard.queue.pop_front().expect("front checked above");
                        if let Some(tx) = item.completion.take() {
                            let _ = tx.send(false);
                        }
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    });
}

impl Limiter for LeakyBucket {
    fn try_consume<'a>(&'a self, tokens: u64) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if tokens == 0 || tokens > self.queue_capacity {
                return false;
            }
            let mut inner = self.inner.lock();
            let size = Self::queue_size(&inner);
            if size >= self.queue_capacity {
                return false;
            }
            let estimated_wait_ms = (size as f64 * 1000.0 / self.leak_rate_per_second) as u64;
            if estimated_wait_ms > self.max_queue_time_ms {
                return false;
            }
            inner.queue.push_back(QueueItem {
                enqueue_time_ms: self.clock.now_ms(),
                tokens,
                completion: None,
            });
            true
        })
    }

    fn current_available<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            let inner = self.inner.lock();
            self.queue_capacity.saturating_sub(Self::queue_size(&inner))
        })
    }

    fn capacity(&self) -> u64 {
        self.queue_capacity
    }

    fn refill_rate(&self) -> f64 {
        self.leak_rate_per_second
    }

    fn last_update_ms<'a>(&'a self) -> BoxFuture<'a, u64> {
        Box::pin(async move { self.inner.lock().last_leak_ms })
    }

    fn name(&self) -> &'static str {
        "leaky_bucket"
    }
}
