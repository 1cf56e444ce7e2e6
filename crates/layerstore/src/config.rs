//! Store configuration.
//!
//! [`StoreConfig`] controls how a store reads and writes.  Defaults are
//! provided via the [`Default`] implementation; a builder-style API allows
//! callers to customise individual fields fluently, and the whole struct can
//! be loaded from TOML.
//!
//! ```toml
//! change_capacity = 512
//! fetch_policy = "cache-and-fetch"
//! optimistic = true
//! dedupe = true
//! validate_inbound = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, StoreError};

/// How a read chooses between the cache and the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    /// Answer from the cache when it knows the key; fetch otherwise.
    #[default]
    CacheFirst,
    /// Answer from the cache when it can and refresh in the background.
    CacheAndFetch,
    /// Always fetch.
    FetchOnly,
    /// Never fetch.
    CacheOnly,
}

/// Behaviour of one store instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Buffered change events per subscriber before a slow subscriber lags.
    ///
    /// Default: **256**.
    pub change_capacity: usize,

    /// Policy used by `get` and `list`.
    ///
    /// Default: **cache-first**.
    pub fetch_policy: FetchPolicy,

    /// Stage mutations in an optimistic layer unless a call opts out.
    ///
    /// Default: **true**.
    pub optimistic: bool,

    /// Share one backend call between identical concurrent fetches.
    ///
    /// Default: **true**.
    pub dedupe: bool,

    /// Validate adapter results and pushed items against the item schema.
    ///
    /// Default: **true**.
    pub validate_inbound: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            change_capacity: 256,
            fetch_policy: FetchPolicy::CacheFirst,
            optimistic: true,
            dedupe: true,
            validate_inbound: true,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.  Missing fields keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| StoreError::Config(format!("failed to parse TOML config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "store configuration loaded");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| StoreError::Config(format!("failed to serialize config: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.change_capacity == 0 {
            return Err(StoreError::Config(
                "change_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the change channel capacity.
    pub fn with_change_capacity(mut self, capacity: usize) -> Self {
        self.change_capacity = capacity;
        self
    }

    /// Set the default fetch policy.
    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    /// Enable or disable optimistic staging by default.
    pub fn with_optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }

    /// Enable or disable fetch deduplication.
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// Enable or disable inbound item validation.
    pub fn with_validate_inbound(mut self, validate: bool) -> Self {
        self.validate_inbound = validate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.change_capacity, 256);
        assert_eq!(cfg.fetch_policy, FetchPolicy::CacheFirst);
        assert!(cfg.optimistic);
        assert!(cfg.dedupe);
        assert!(cfg.validate_inbound);
        assert_eq!(cfg, StoreConfig::new());
    }

    #[test]
    fn builder_chaining() {
        let cfg = StoreConfig::new()
            .with_change_capacity(8)
            .with_fetch_policy(FetchPolicy::FetchOnly)
            .with_optimistic(false)
            .with_dedupe(false)
            .with_validate_inbound(false);
        assert_eq!(cfg.change_capacity, 8);
        assert_eq!(cfg.fetch_policy, FetchPolicy::FetchOnly);
        assert!(!cfg.optimistic);
        assert!(!cfg.dedupe);
        assert!(!cfg.validate_inbound);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = StoreConfig::from_toml_str("fetch_policy = \"cache-and-fetch\"\ndedupe = false\n")
            .unwrap();
        assert_eq!(cfg.fetch_policy, FetchPolicy::CacheAndFetch);
        assert!(!cfg.dedupe);
        assert_eq!(cfg.change_capacity, 256);
    }

    #[test]
    fn toml_round_trip() {
        let cfg = StoreConfig::new().with_fetch_policy(FetchPolicy::CacheOnly);
        let text = cfg.to_toml_string().unwrap();
        assert!(text.contains("fetch_policy = \"cache-only\""));
        assert_eq!(StoreConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            StoreConfig::from_toml_str("change_capacity = 0"),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("fetch_policy = \"sometimes\""),
            Err(StoreError::Config(_))
        ));
    }
}
