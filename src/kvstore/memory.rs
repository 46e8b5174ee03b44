//! In-process [`KVStore`] implementation, atomic via `DashMap`'s per-shard
//! entry API (a single locked access per call, unlike a separate get/set).

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::algorithm::BoxFuture;
use crate::error::Result;
use crate::kvstore::{
    FixedWindowResult, KVStore, LeakyBucketResult, SlidingWindowResult, TokenBucketResult,
};

#[derive(Debug, Clone)]
enum Entry {
    TokenBucket { available: f64, last_update_ms: u64 },
    FixedWindow { window_start_ms: u64, count: u64 },
    SlidingWindow { records: VecDeque<(u64, u64)>, used: u64 },
    LeakyBucket { queue: VecDeque<(u64, u64)>, last_leak_ms: u64 },
}

/// In-process stand-in for a real distributed store; implements the same
/// atomic-script contract Redis does, genuinely atomically, via `DashMap`.
#[derive(Default)]
pub struct MemoryStore {
    data: DashMap<String, Entry>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KVStore for MemoryStore {
    fn token_bucket_consume<'a>(
        &'a self,
        key: &'a str,
        capacity: u64,
        refill_rate: f64,
        tokens: u64,
        now_ms: u64,
    ) -> BoxFuture<'a, Result<TokenBucketResult>> {
        Box::pin(async move {
            let mut result = TokenBucketResult {
                allowed: false,
                available: 0.0,
                last_update_ms: now_ms,
            };
            self.data
                .entry(key.to_string())
                .and_modify(|entry| {
                    if let Entry::TokenBucket { available, last_update_ms } = entry {
                        if now_ms > *last_update_ms {
                            let added = ((now_ms - *last_update_ms) as f64 / 1000.0) * refill_rate;
                            *available = (*available + added).min(capacity as f64);
                            *last_update_ms = now_ms;
                        }
                        result = apply_token_bucket(available, *last_update_ms, capacity, tokens);
                    }
                })
                .or_insert_with(|| {
                    let mut available = capacity as f64;
                    result = apply_token_bucket(&mut available, now_ms, capacity, tokens);
                    Entry::TokenBucket { available, last_update_ms: now_ms }
                });
            Ok(result)
        })
    }

    fn fixed_window_consume<'a>(
        &'a self,
        key: &'a str,
        capacity: u64,
        window_duration_ms: u64,
        tokens: u64,
        now_ms: u64,
    ) -> BoxFuture<'a, Result<FixedWindowResult>> {
        Box::pin(async move {
            let mut result = FixedWindowResult { allowed: false, count: 0, window_start_ms: 0 };
            self.data
                .entry(key.to_string())
                .and_modify(|entry| {
                    if let Entry::FixedWindow { window_start_ms, count } = entry {
                        if now_ms.saturating_sub(*window_start_ms) >= window_duration_ms {
                            *window_start_ms = (now_ms / window_duration_ms) * window_duration_ms;
                            *count = 0;
                        }
                        result = apply_fixed_window(window_start_ms, count, capacity, tokens);
                    }
                })
                .or_insert_with(|| {
                    let window_start_ms = (now_ms / window_duration_ms) * window_duration_ms;
                    let mut count = 0u64;
                    let mut window_start = window_start_ms;
                    result = apply_fixed_window(&mut window_start, &mut count, capacity, tokens);
                    Entry::FixedWindow { window_start_ms: window_start, count }
                });
            Ok(result)
        })
    }

    fn sliding_window_consume<'a>(
        &'a self,
        key: &'a str,
        capacity: u64,
        tokens: u64,
        now_ms: u64,
    ) -> BoxFuture<'a, Result<SlidingWindowResult>> {
        Box::pin(async move {
            let mut result = SlidingWindowResult { allowed: false, used: 0 };
            self.data
                .entry(key.to_string())
                .and_modify(|entry| {
                    if let Entry::SlidingWindow { records, used } = entry {
                        result = apply_sliding_window(records, used, capacity, tokens, now_ms);
                    }
                })
                .or_insert_with(|| {
                    let mut records = VecDeque::new();
                    let mut used = 0u64;
                    result = apply_sliding_window(&mut records, &mut used, capacity, tokens, now_ms);
                    Entry::SlidingWindow { records, used }
                });
            Ok(result)
        })
    }

    fn leaky_bucket_consume<'a>(
        &'a self,
        key: &'a str,
        queue_capacity: u64,
        leak_rate_per_second: f64,
        max_queue_time_ms: u64,
        tokens: u64,
        now_ms: u64,
    ) -> BoxFuture<'a, Result<LeakyBucketResult>> {
        Box::pin(async move {
            let mut result = LeakyBucketResult { allowed: false, queue_size: 0, last_leak_ms: now_ms };
            self.data
                .entry(key.to_string())
                .and_modify(|entry| {
                    if let Entry::LeakyBucket { queue, last_leak_ms } = entry {
                        leak(queue, last_leak_ms, leak_rate_per_second, now_ms);
                        result = apply_leaky_bucket(
                            queue,
                            *last_leak_ms,
                            queue_capacity,
                            leak_rate_per_second,
                            max_queue_time_ms,
                            tokens,
                            now_ms,
                        );
                    }
                })
                .or_insert_with(|| {
                    let mut queue = VecDeque::new();
                    result = apply_leaky_bucket(
                        &mut queue,
                        now_ms,
                        queue_capacity,
                        leak_rate_per_second,
                        max_queue_time_ms,
                        tokens,
                        now_ms,
                    );
                    Entry::LeakyBucket { queue, last_leak_ms: now_ms }
                });
            Ok(result)
        })
    }

    fn is_available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { true })
    }

    fn active_count<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            Ok(self.data.iter().filter(|e| e.key().starts_with(prefix)).count() as u64)
        })
    }

    fn clear<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.data.retain(|k, _| !k.starts_with(prefix));
            Ok(())
        })
    }
}

fn apply_token_bucket(available: &mut f64, last_update_ms: u64, capacity: u64, tokens: u64) -> TokenBucketResult {
    if tokens == 0 || tokens > capacity {
        return TokenBucketResult { allowed: tokens == 0, available: *available, last_update_ms };
    }
    if *available >= tokens as f64 {
        *available -= tokens as f64;
        TokenBucketResult { allowed: true, available: *available, last_update_ms }
    } else {
        TokenBucketResult { allowed: false, available: *available, last_update_ms }
    }
}

fn apply_fixed_window(window_start_ms: &mut u64, count: &mut u64, capacity: u64, tokens: u64) -> FixedWindowResult {
    if tokens == 0 || tokens > capacity {
        return FixedWindowResult { allowed: tokens == 0, count: *count, window_start_ms: *window_start_ms };
    }
    if *count + tokens <= capacity {
        *count += tokens;
        FixedWindowResult { allowed: true, count: *count, window_start_ms: *window_start_ms }
    } else {
        FixedWindowResult { allowed: false, count: *count, window_start_ms: *window_start_ms }
    }
}

fn apply_sliding_window(
    records: &mut VecDeque<(u64, u64)>,
    used: &mut u64,
    capacity: u64,
    tokens: u64,
    now_ms: u64,
) -> SlidingWindowResult {
    let cutoff = now_ms.saturating_sub(1000);
    while let Some(&(ts, t)) = records.front() {
        if ts < cutoff {
            records.pop_front();
            *used -= t;
        } else {
            break;
        }
    }
    if tokens == 0 || tokens > capacity || *used + tokens > capacity {
        return SlidingWindowResult { allowed: tokens == 0, used: *used };
    }
    records.push_back((now_ms, tokens));
    *used += tokens;
    SlidingWindowResult { allowed: true, used: *used }
}

fn leak(queue: &mut VecDeque<(u64, u64)>, last_leak_ms: &mut u64, leak_rate_per_second: f64, now_ms: u64) {
    let elapsed_ms = now_ms.saturating_sub(*last_leak_ms);
    let mut budget = ((elapsed_ms as f64 / 1000.0) * leak_rate_per_second).floor() as u64;
    if budget == 0 {
        return;
    }
    let mut drained = false;
    while let Some(&(_, t)) = queue.front() {
        if t > budget {
            break;
        }
        queue.pop_front();
        budget -= t;
        drained = true;
    }
    if drained {
        *last_leak_ms = now_ms;
    }
}

fn apply_leaky_bucket(
    queue: &mut VecDeque<(u64, u64)>,
    last_leak_ms: u64,
    queue_capacity: u64,
    leak_rate_per_second: f64,
    max_queue_time_ms: u64,
    tokens: u64,
    now_ms: u64,
) -> LeakyBucketResult {
    let size: u64 = queue.iter().map(|&(_, t)| t).sum();
    if tokens == 0 || size >= queue_capacity {
        return LeakyBucketResult { allowed: tokens == 0, queue_size: size, last_leak_ms };
    }
    let estimated_wait_ms = (size as f64 * 1000.0 / leak_rate_per_second) as u64;
    if estimated_wait_ms > max_queue_time_ms {
        return LeakyBucketResult { allowed: false, queue_size: size, last_leak_ms };
    }
    queue.push_back((now_ms, tokens));
    LeakyBucketResult { allowed: true, queue_size: size + tokens, last_leak_ms }
}
