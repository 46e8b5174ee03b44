//! Configuration types: the algorithm enum and the per-key/per-pattern
//! parameter tuple resolved by [`crate::resolver::ConfigResolver`].

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Which algorithm a [`LimitConfig`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Algorithm {
    TokenBucket,
    SlidingWindow,
    FixedWindow,
    LeakyBucket,
    Composite,
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::TokenBucket
    }
}

/// The parameters a key resolves to.
///
/// Partial configs (as written by `SetKeyConfig`/`SetPatternConfig`) are
/// completed against a default by [`LimitConfig::inherit_from`]: a
/// non-positive `capacity`/`refill_rate`, or an absent `cleanup_interval_ms`,
/// is filled in field-by-field rather than rejecting the whole config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    pub algorithm: Algorithm,
    pub capacity: u64,
    pub refill_rate: f64,
    /// Idle time after which the registry evicts this key's holder.
    pub cleanup_interval_ms: u64,
    /// `FIXED_WINDOW` / `SLIDING_WINDOW` window size; unused otherwise.
    pub window_duration_ms: Option<u64>,
    /// `LEAKY_BUCKET` admission cap for the synchronous approximation and for
    /// the queue timeout sweep.
    pub max_queue_time_ms: Option<u64>,
}

impl LimitConfig {
    /// Default idle-eviction interval (60 s), matching the registry evictor's
    /// default sweep period.
    pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60_000;

    /// Build a token-bucket config with the given capacity and refill rate.
    pub fn token_bucket(capacity: u64, refill_rate: f64) -> Self {
        Self {
            algorithm: Algorithm::TokenBucket,
            capacity,
            refill_rate,
            cleanup_interval_ms: Self::DEFAULT_CLEANUP_INTERVAL_MS,
            window_duration_ms: None,
            max_queue_time_ms: None,
        }
    }

    /// Build a sliding-window config. The window is always 1000 ms per spec;
    /// `window_duration_ms` is accepted for symmetry with fixed window but
    /// ignored by the algorithm itself.
    pub fn sliding_window(capacity: u64) -> Self {
        Self {
            algorithm: Algorithm::SlidingWindow,
            capacity,
            refill_rate: capacity as f64,
            cleanup_interval_ms: Self::DEFAULT_CLEANUP_INTERVAL_MS,
            window_duration_ms: Some(1000),
            max_queue_time_ms: None,
        }
    }

    /// Build a fixed-window config.
    pub fn fixed_window(capacity: u64, window_duration_ms: u64) -> Self {
        Self {
            algorithm: Algorithm::FixedWindow,
            capacity,
            refill_rate: capacity as f64,
            cleanup_interval_ms: Self::DEFAULT_CLEANUP_INTERVAL_MS,
            window_duration_ms: Some(window_duration_ms),
            max_queue_time_ms: None,
        }
    }

    /// Build a leaky-bucket config.
    pub fn leaky_bucket(queue_capacity: u64, leak_rate_per_second: f64, max_queue_time_ms: u64) -> Self {
        Self {
            algorithm: Algorithm::LeakyBucket,
            capacity: queue_capacity,
            refill_rate: leak_rate_per_second,
            cleanup_interval_ms: Self::DEFAULT_CLEANUP_INTERVAL_MS,
            window_duration_ms: None,
            max_queue_time_ms: Some(max_queue_time_ms),
        }
    }

    /// Fill in any unset/invalid field from `default`, field-by-field.
    pub fn inherit_from(mut self, default: &LimitConfig) -> Self {
        if self.capacity == 0 {
            self.capacity = default.capacity;
        }
        if self.refill_rate <= 0.0 {
            self.refill_rate = default.refill_rate;
        }
        if self.cleanup_interval_ms == 0 {
            self.cleanup_interval_ms = default.cleanup_interval_ms;
        }
        if self.window_duration_ms.is_none() {
            self.window_duration_ms = default.window_duration_ms;
        }
        if self.max_queue_time_ms.is_none() {
            self.max_queue_time_ms = default.max_queue_time_ms;
        }
        self
    }

    /// Validate the fully-inherited config.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidLimitConfig("capacity must be > 0".into()).into());
        }
        if self.refill_rate <= 0.0 {
            return Err(
                ConfigError::InvalidLimitConfig("refill_rate must be > 0".into()).into(),
            );
        }
        match self.algorithm {
            Algorithm::FixedWindow | Algorithm::SlidingWindow => {
                if self.window_duration_ms.map(|w| w == 0).unwrap_or(true) {
                    return Err(ConfigError::InvalidLimitConfig(
                        "window_duration_ms must be set and > 0".into(),
                    )
                    .into());
                }
            }
            Algorithm::LeakyBucket => {
                if self.max_queue_time_ms.map(|m| m == 0).unwrap_or(true) {
                    return Err(ConfigError::InvalidLimitConfig(
                        "max_queue_time_ms must be set and > 0".into(),
                    )
                    .into());
                }
            }
            Algorithm::TokenBucket | Algorithm::Composite => {}
        }
        Ok(())
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self::token_bucket(10, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inherit_from_fills_missing_fields() {
        let default = LimitConfig::token_bucket(10, 2.0);
        let partial = LimitConfig {
            algorithm: Algorithm::TokenBucket,
            capacity: 0,
            refill_rate: 0.0,
            cleanup_interval_ms: 0,
            window_duration_ms: None,
            max_queue_time_ms: None,
        };

        let resolved = partial.inherit_from(&default);
        assert_eq!(resolved.capacity, 10);
        assert_eq!(resolved.refill_rate, 2.0);
        assert_eq!(resolved.cleanup_interval_ms, LimitConfig::DEFAULT_CLEANUP_INTERVAL_MS);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let cfg = LimitConfig::token_bucket(0, 1.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_requires_window_duration() {
        let mut cfg = LimitConfig::fixed_window(10, 1000);
        cfg.window_duration_ms = None;
        assert!(cfg.validate().is_err());
    }
}
