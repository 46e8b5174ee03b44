//! Redis-backed [`KVStore`] (C2): each algorithm is realized as a single
//! `redis::Script`, so a decision is always one `EVALSHA` round trip.
//!
//! A prior revision of this backend did a plain `GET` followed by a `SET`,
//! computing the new state in Rust between the two calls — under concurrent
//! callers for the same key that is not atomic at all, just two independent
//! round trips racing each other. Every method here instead ships the
//! read-modify-write logic to the server as Lua, which Redis executes
//! single-threaded to completion before any other command runs.

use std::time::Duration;

use deadpool_redis::redis::{AsyncCommands, Script};
use deadpool_redis::{Config, Connection, Pool, Runtime};

use crate::algorithm::BoxFuture;
use crate::error::{ConnectionError, Result, StorageError};
use crate::kvstore::{
    FixedWindowResult, KVStore, LeakyBucketResult, SlidingWindowResult, TokenBucketResult,
};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: usize,
    pub key_prefix: String,
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "rate_limit:".to_string(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Default::default() }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }
}

const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local tokens = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl_ms = tonumber(ARGV[5])

local data = redis.call('HMGET', key, 'tokens', 'last_refill')
local available = tonumber(data[1])
local last_update = tonumber(data[2])
if available == nil then
  available = capacity
  last_update = now
end
if now > last_update then
  local added = ((now - last_update) / 1000.0) * refill_rate
  available = math.min(capacity, available + added)
  last_update = now
end

local allowed = 0
if tokens > 0 and tokens <= capacity and available >= tokens then
  available = available - tokens
  allowed = 1
end

redis.call('HMSET', key, 'tokens', tostring(available), 'last_refill', tostring(last_update), 'capacity', tostring(capacity), 'refill_rate', tostring(refill_rate))
redis.call('PEXPIRE', key, ttl_ms)
return {tostring(allowed), tostring(available), tostring(last_update)}
"#;

const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local window_duration = tonumber(ARGV[2])
local tokens = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl_ms = tonumber(ARGV[5])

local data = redis.call('HMGET', key, 'window_start', 'count')
local window_start = tonumber(data[1])
local count = tonumber(data[2])
if window_start == nil then
  window_start = now - (now % window_duration)
  count = 0
end
if (now - window_start) >= window_duration then
  window_start = now - (now % window_duration)
  count = 0
end

local allowed = 0
if tokens > 0 and tokens <= capacity and (count + tokens) <= capacity then
  count = count + tokens
  allowed = 1
end

redis.call('HMSET', key, 'window_start', tostring(window_start), 'count', tostring(count), 'capacity', tostring(capacity), 'window_duration', tostring(window_duration))
redis.call('PEXPIRE', key, ttl_ms)
return {tostring(allowed), tostring(count), tostring(window_start)}
"#;

const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local tokens = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl_ms = tonumber(ARGV[4])
local cutoff = now - 1000

local raw = redis.call('LRANGE', key, 0, -1)
local used = 0
local kept = {}
for _, v in ipairs(raw) do
  local sep = string.find(v, ':')
  local ts = tonumber(string.sub(v, 1, sep - 1))
  local tok = tonumber(string.sub(v, sep + 1))
  if ts >= cutoff then
    used = used + tok
    table.insert(kept, v)
  end
end

local allowed = 0
if tokens > 0 and tokens <= capacity and (used + tokens) <= capacity then
  table.insert(kept, tostring(now) .. ':' .. tostring(tokens))
  used = used + tokens
  allowed = 1
end

redis.call('DEL', key)
if #kept > 0 then
  redis.call('RPUSH', key, unpack(kept))
end
redis.call('PEXPIRE', key, ttl_ms)
return {tostring(allowed), tostring(used)}
"#;

const LEAKY_BUCKET_SCRIPT: &str = r#"
local qkey = KEYS[1]
local mkey = KEYS[2]
local queue_capacity = tonumber(ARGV[1])
local leak_rate = tonumber(ARGV[2])
local max_queue_time_ms = tonumber(ARGV[3])
local tokens = tonumber(ARGV[4])
local now = tonumber(ARGV[5])
local ttl_ms = tonumber(ARGV[6])

local last_leak = tonumber(redis.call('HGET', mkey, 'last_leak_time'))
if last_leak == nil then
  last_leak = now
end

local raw = redis.call('LRANGE', qkey, 0, -1)
local items = {}
local size = 0
for _, v in ipairs(raw) do
  local sep = string.find(v, ':')
  local ts = tonumber(string.sub(v, 1, sep - 1))
  local tok = tonumber(string.sub(v, sep + 1))
  table.insert(items, {ts, tok})
  size = size + tok
end

local elapsed = now - last_leak
local budget = math.floor((elapsed / 1000.0) * leak_rate)
if budget > 0 then
  local drained = false
  while (#items > 0) and (items[1][2] <= budget) do
    local item = table.remove(items, 1)
    budget = budget - item[2]
    size = size - item[2]
    drained = true
  end
  if drained then
    last_leak = now
  end
end

local allowed = 0
if tokens > 0 and size < queue_capacity then
  local estimated_wait = (size * 1000.0) / leak_rate
  if estimated_wait <= max_queue_time_ms then
    table.insert(items, {now, tokens})
    size = size + tokens
    allowed = 1
  end
end

redis.call('DEL', qkey)
for _, item in ipairs(items) do
  redis.call('RPUSH', qkey, tostring(item[1]) .. ':' .. tostring(item[2]))
end
redis.call('HMSET', mkey, 'last_leak_time', tostring(last_leak), 'capacity', tostring(queue_capacity), 'leak_rate', tostring(leak_rate))
redis.call('PEXPIRE', qkey, ttl_ms)
redis.call('PEXPIRE', mkey, ttl_ms)
return {tostring(allowed), tostring(size), tostring(last_leak)}
"#;

/// Redis-backed atomic-script store.
pub struct RedisStore {
    pool: Pool,
    key_prefix: String,
    token_bucket_script: Script,
    fixed_window_script: Script,
    sliding_window_script: Script,
    leaky_bucket_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("key_prefix", &self.key_prefix).finish()
    }
}

impl RedisStore {
    /// Connect and verify liveness with a `PING`.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
        let _: () = deadpool_redis::redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
            token_bucket_script: Script::new(TOKEN_BUCKET_SCRIPT),
            fixed_window_script: Script::new(FIXED_WINDOW_SCRIPT),
            sliding_window_script: Script::new(SLIDING_WINDOW_SCRIPT),
            leaky_bucket_script: Script::new(LEAKY_BUCKET_SCRIPT),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn get_conn(&self) -> Result<Connection> {
        self.pool.get().await.map_err(|_| StorageError::PoolExhausted.into())
    }

    fn parse_u64(field: &str, value: &str) -> Result<u64> {
        value
            .parse::<f64>()
            .map(|v| v as u64)
            .map_err(|_| StorageError::MalformedResult(format!("{field}: {value:?}")).into())
    }

    fn parse_f64(field: &str, value: &str) -> Result<f64> {
        value
            .parse::<f64>()
            .map_err(|_| StorageError::MalformedResult(format!("{field}: {value:?}")).into())
    }
}

impl KVStore for RedisStore {
    fn token_bucket_consume<'a>(
        &'a self,
        key: &'a str,
        capacity: u64,
        refill_rate: f64,
        tokens: u64,
        now_ms: u64,
    ) -> BoxFuture<'a, Result<TokenBucketResult>> {
        Box::pin(async move {
            let mut conn = self.get_conn().await?;
            let ttl_ms = crate::kvstore::ttl_for_window(0).as_millis() as u64;
            let raw: Vec<String> = self
                .token_bucket_script
                .key(self.full_key(key))
                .arg(capacity)
                .arg(refill_rate)
                .arg(tokens)
                .arg(now_ms)
                .arg(ttl_ms)
                .invoke_async(&mut *conn)
                .await
                .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;

            let [allowed, available, last_update] = raw
                .try_into()
                .map_err(|v: Vec<String>| StorageError::MalformedResult(format!("{v:?}")))?;

            Ok(TokenBucketResult {
                allowed: allowed == "1",
                available: Self::parse_f64("available", &available)?,
                last_update_ms: Self::parse_u64("last_update", &last_update)?,
            })
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
            let mut conn = self.get_conn().await?;
            let ttl_ms = crate::kvstore::ttl_for_window(window_duration_ms).as_millis() as u64;
            let raw: Vec<String> = self
                .fixed_window_script
                .key(self.full_key(key))
                .arg(capacity)
                .arg(window_duration_ms)
                .arg(tokens)
                .arg(now_ms)
                .arg(ttl_ms)
                .invoke_async(&mut *conn)
                .await
                .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;

            let [allowed, count, window_start] = raw
                .try_into()
                .map_err(|v: Vec<String>| StorageError::MalformedResult(format!("{v:?}")))?;

            Ok(FixedWindowResult {
                allowed: allowed == "1",
                count: Self::parse_u64("count", &count)?,
                window_start_ms: Self::parse_u64("window_start", &window_start)?,
            })
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
            let mut conn = self.get_conn().await?;
            let ttl_ms = crate::kvstore::ttl_for_window(1000).as_millis() as u64;
            let raw: Vec<String> = self
                .sliding_window_script
                .key(self.full_key(key))
                .arg(capacity)
                .arg(tokens)
                .arg(now_ms)
                .arg(ttl_ms)
                .invoke_async(&mut *conn)
                .await
                .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;

            let [allowed, used] = raw
                .try_into()
                .map_err(|v: Vec<String>| StorageError::MalformedResult(format!("{v:?}")))?;

            Ok(SlidingWindowResult {
                allowed: allowed == "1",
                used: Self::parse_u64("used", &used)?,
            })
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
            let mut conn = self.get_conn().await?;
            let qkey = format!("{}:queue", self.full_key(key));
            let mkey = format!("{}:meta", self.full_key(key));
            let ttl_ms = max_queue_time_ms + 3_600_000;
            let raw: Vec<String> = self
                .leaky_bucket_script
                .key(qkey)
                .key(mkey)
                .arg(queue_capacity)
                .arg(leak_rate_per_second)
                .arg(max_queue_time_ms)
                .arg(tokens)
                .arg(now_ms)
                .arg(ttl_ms)
                .invoke_async(&mut *conn)
                .await
                .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;

            let [allowed, queue_size, last_leak] = raw
                .try_into()
                .map_err(|v: Vec<String>| StorageError::MalformedResult(format!("{v:?}")))?;

            Ok(LeakyBucketResult {
                allowed: allowed == "1",
                queue_size: Self::parse_u64("queue_size", &queue_size)?,
                last_leak_ms: Self::parse_u64("last_leak", &last_leak)?,
            })
        })
    }

    fn is_available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let Ok(mut conn) = self.pool.get().await else {
                return false;
            };
            deadpool_redis::redis::cmd("PING").query_async::<()>(&mut *conn).await.is_ok()
        })
    }

    fn active_count<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let Ok(mut conn) = self.get_conn().await else { return Ok(0) };
            let pattern = format!("{}{}*", self.key_prefix, prefix);
            let keys: Vec<String> = conn.keys(pattern).await.unwrap_or_default();
            Ok(keys.len() as u64)
        })
    }

    fn clear<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Ok(mut conn) = self.get_conn().await else { return Ok(()) };
            let pattern = format!("{}{}*", self.key_prefix, prefix);
            let keys: Vec<String> = conn.keys(pattern).await.unwrap_or_default();
            if !keys.is_empty() {
                let _: std::result::Result<(), _> = conn.del(keys).await;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_builder() {
        let config = RedisConfig::new("redis://localhost:6380")
            .with_prefix("test:")
            .with_pool_size(5);

        assert_eq!(config.url, "redis://localhost:6380");
        assert_eq!(config.key_prefix, "test:");
        assert_eq!(config.pool_size, 5);
    }
}
