//! # Peer Pool Configuration
//!
//! Topic limits, polling periods and discovery policy, supplied by the
//! embedding node in memory or loaded from TOML.
//!
//! ```toml
//! stop_on_max = true
//! fast_sync_ms = 3000
//! slow_sync_ms = 30000
//! fast_mode_timeout_ms = 30000
//! discovery_timeout_ms = 180000
//! expiration_period_ms = 3600000
//! cache_prefetch = 5
//!
//! [topics.whisper]
//! min = 2
//! max = 2
//! ```
//!
//! Every key is optional. `discovery_timeout_ms = 0` disables the timeout.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::domain::{
    ConfigError, Limits, Topic, DEFAULT_CACHE_PREFETCH, DEFAULT_DISCOVERY_TIMEOUT,
    DEFAULT_EXPIRATION_PERIOD, DEFAULT_FAST_SYNC, DEFAULT_SLOW_SYNC,
    DEFAULT_TOPIC_FAST_MODE_TIMEOUT,
};
use crate::service::SyncPeriods;

/// Peer pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPoolConfig {
    /// Connected-peer limits per topic.
    pub topics: BTreeMap<Topic, Limits>,
    /// Polling period while a topic is under-subscribed.
    pub fast_sync: Duration,
    /// Polling period once a topic is satisfied.
    pub slow_sync: Duration,
    /// Fast mode downgrades itself after this long. Zero disables it.
    pub fast_mode_timeout: Duration,
    /// Discovery is shut down this long after each (re)start when
    /// `stop_on_max` is set. Zero disables it.
    pub discovery_timeout: Duration,
    /// Shut discovery down once every topic reached its max.
    pub stop_on_max: bool,
    /// Candidates older than this are not dialed.
    pub expiration_period: Duration,
    /// Cached peers used to seed each topic search.
    pub cache_prefetch: usize,
}

impl Default for PeerPoolConfig {
    fn default() -> Self {
        Self {
            topics: BTreeMap::new(),
            fast_sync: DEFAULT_FAST_SYNC,
            slow_sync: DEFAULT_SLOW_SYNC,
            fast_mode_timeout: DEFAULT_TOPIC_FAST_MODE_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            stop_on_max: false,
            expiration_period: DEFAULT_EXPIRATION_PERIOD,
            cache_prefetch: DEFAULT_CACHE_PREFETCH,
        }
    }
}

impl PeerPoolConfig {
    /// Millisecond-scale periods for tests.
    pub fn for_testing() -> Self {
        Self {
            topics: BTreeMap::new(),
            fast_sync: Duration::from_millis(10),
            slow_sync: Duration::from_millis(100),
            fast_mode_timeout: Duration::from_millis(500),
            discovery_timeout: Duration::ZERO,
            stop_on_max: false,
            expiration_period: Duration::from_secs(60),
            cache_prefetch: DEFAULT_CACHE_PREFETCH,
        }
    }

    /// Add or replace the limits of a topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<Topic>, limits: Limits) -> Self {
        self.topics.insert(topic.into(), limits);
        self
    }

    /// Set the stop-on-max policy.
    #[must_use]
    pub fn with_stop_on_max(mut self, stop_on_max: bool) -> Self {
        self.stop_on_max = stop_on_max;
        self
    }

    /// Polling periods handed to each topic's sync strategy.
    pub fn sync_periods(&self) -> SyncPeriods {
        SyncPeriods {
            fast: self.fast_sync,
            slow: self.slow_sync,
            fast_mode_timeout: self.fast_mode_timeout,
        }
    }

    /// Load and validate configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        let defaults = Self::default();

        let config = Self {
            topics: file
                .topics
                .into_iter()
                .map(|(name, limits)| (Topic::new(name), Limits::new(limits.min, limits.max)))
                .collect(),
            fast_sync: millis_or(file.fast_sync_ms, defaults.fast_sync),
            slow_sync: millis_or(file.slow_sync_ms, defaults.slow_sync),
            fast_mode_timeout: millis_or(file.fast_mode_timeout_ms, defaults.fast_mode_timeout),
            discovery_timeout: millis_or(file.discovery_timeout_ms, defaults.discovery_timeout),
            stop_on_max: file.stop_on_max.unwrap_or(defaults.stop_on_max),
            expiration_period: millis_or(file.expiration_period_ms, defaults.expiration_period),
            cache_prefetch: file.cache_prefetch.unwrap_or(defaults.cache_prefetch),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject `min > max` and zero polling periods.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (topic, limits) in &self.topics {
            if !limits.is_valid() {
                return Err(ConfigError::InvalidLimits {
                    topic: topic.clone(),
                    min: limits.min,
                    max: limits.max,
                });
            }
        }
        if self.fast_sync.is_zero() {
            return Err(ConfigError::ZeroPeriod("fast_sync"));
        }
        if self.slow_sync.is_zero() {
            return Err(ConfigError::ZeroPeriod("slow_sync"));
        }
        if self.expiration_period.is_zero() {
            return Err(ConfigError::ZeroPeriod("expiration_period"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    topics: BTreeMap<String, LimitsFile>,
    fast_sync_ms: Option<u64>,
    slow_sync_ms: Option<u64>,
    fast_mode_timeout_ms: Option<u64>,
    discovery_timeout_ms: Option<u64>,
    stop_on_max: Option<bool>,
    expiration_period_ms: Option<u64>,
    cache_prefetch: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct LimitsFile {
    min: usize,
    max: usize,
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}
