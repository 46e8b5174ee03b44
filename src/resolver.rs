//! Configuration resolver (C5): key → [`LimitConfig`] via exact → pattern →
//! default precedence, with a memoized concurrent cache.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;

use crate::config::LimitConfig;
use crate::error::{ConfigError, Result};

/// Where config records live. [`MemoryConfigSource`] is the only
/// implementation; the trait exists so `reload()`'s cache-then-registry
/// invalidation order stays independent of storage.
pub trait ConfigSource: Send + Sync {
    fn default_config(&self) -> LimitConfig;
    fn set_default(&self, config: LimitConfig);
    fn exact_config(&self, key: &str) -> Option<LimitConfig>;
    fn set_exact(&self, key: &str, config: LimitConfig);
    fn remove_exact(&self, key: &str);
    /// Patterns in insertion order; first match wins.
    fn patterns(&self) -> Vec<(String, LimitConfig)>;
    fn set_pattern(&self, pattern: &str, config: LimitConfig) -> Result<()>;
    fn remove_pattern(&self, pattern: &str);
}

/// In-process `ConfigSource`: a `DashMap` for exact keys, an insertion-order
/// list behind a `RwLock` for patterns (so "first match wins" is testable),
/// and a `RwLock<LimitConfig>` default.
pub struct MemoryConfigSource {
    default: RwLock<LimitConfig>,
    exact: DashMap<String, LimitConfig>,
    patterns: RwLock<Vec<(String, LimitConfig)>>,
}

impl MemoryConfigSource {
    pub fn new(default: LimitConfig) -> Self {
        Self {
            default: RwLock::new(default),
            exact: DashMap::new(),
            patterns: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryConfigSource {
    fn default() -> Self {
        Self::new(LimitConfig::default())
    }
}

impl ConfigSource for MemoryConfigSource {
    fn default_config(&self) -> LimitConfig {
        *self.default.read()
    }

    fn set_default(&self, config: LimitConfig) {
        *self.default.write() = config;
    }

    fn exact_config(&self, key: &str) -> Option<LimitConfig> {
        self.exact.get(key).map(|r| *r)
    }

    fn set_exact(&self, key: &str, config: LimitConfig) {
        self.exact.insert(key.to_string(), config);
    }

    fn remove_exact(&self, key: &str) {
        self.exact.remove(key);
    }

    fn patterns(&self) -> Vec<(String, LimitConfig)> {
        self.patterns.read().clone()
    }

    fn set_pattern(&self, pattern: &str, config: LimitConfig) -> Result<()> {
        compile_pattern(pattern)?;
        let mut patterns = self.patterns.write();
        if let Some(entry) = patterns.iter_mut().find(|(p, _)| p == pattern) {
            entry.1 = config;
        } else {
            patterns.push((pattern.to_string(), config));
        }
        Ok(())
    }

    fn remove_pattern(&self, pattern: &str) {
        self.patterns.write().retain(|(p, _)| p != pattern);
    }
}

/// `*` is the only metacharacter (matches any substring, including empty);
/// every other character is escaped so it only matches literally.
fn compile_pattern(pattern: &str) -> Result<Regex> {
    let anchored = format!(
        "^{}$",
        pattern.split('*').map(regex::escape).collect::<Vec<_>>().join(".*")
    );
    Regex::new(&anchored)
        .map_err(|e| ConfigError::InvalidPattern { pattern: pattern.to_string(), reason: e.to_string() }.into())
}

/// Resolves keys against a [`ConfigSource`], memoizing results until the
/// next [`ConfigResolver::reload`].
pub struct ConfigResolver {
    source: Arc<dyn ConfigSource>,
    cache: DashMap<String, LimitConfig>,
}

impl ConfigResolver {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self { source, cache: DashMap::new() }
    }

    /// Resolve `key` to its effective, fully-inherited, validated config.
    pub fn resolve(&self, key: &str) -> Result<LimitConfig> {
        if let Some(cached) = self.cache.get(key) {
            return Ok(*cached);
        }

        let default = self.source.default_config();
        let resolved = if let Some(exact) = self.source.exact_config(key) {
            exact.inherit_from(&default)
        } else if let Some(pattern_cfg) = self.match_pattern(key) {
            pattern_cfg.inherit_from(&default)
        } else {
            default
        };
        resolved.validate()?;

        self.cache.insert(key.to_string(), resolved);
        Ok(resolved)
    }

    fn match_pattern(&self, key: &str) -> Option<LimitConfig> {
        for (pattern, config) in self.source.patterns() {
            // compile_pattern already validated at set_pattern time.
            if let Ok(re) = compile_pattern(&pattern) {
                if re.is_match(key) {
                    return Some(config);
                }
            }
        }
        None
    }

    pub fn set_key_config(&self, key: &str, config: LimitConfig) {
        self.source.set_exact(key, config);
    }

    pub fn remove_key_config(&self, key: &str) {
        self.source.remove_exact(key);
    }

    pub fn set_pattern_config(&self, pattern: &str, config: LimitConfig) -> Result<()> {
        self.source.set_pattern(pattern, config)
    }

    pub fn remove_pattern_config(&self, pattern: &str) {
        self.source.remove_pattern(pattern);
    }

    pub fn set_default_config(&self, config: LimitConfig) {
        self.source.set_default(config);
    }

    /// Clear the memoized cache. Callers invalidating live config MUST also
    /// clear the registry so existing holders stop using stale params.
    pub fn reload(&self) {
        self.cache.clear();
    }
}
