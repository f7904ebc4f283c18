//! Configuration types
//!
//! Runtime configs (`LoaderConfig`, `CacheConfig`) carry `Duration`s and are
//! built in code. `TrickleConfig` is the TOML file form; every field in the
//! file is required.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default interval between consumer notifications.
pub const DEFAULT_UPDATE_THROTTLE: Duration = Duration::from_millis(250);

/// Upper bound on the notification throttle.
pub const MAX_UPDATE_THROTTLE: Duration = Duration::from_secs(3600);

/// Default buffer size of the cache event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "TRICKLE_CONFIG";

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Minimum spacing between two consumer notifications.
    pub update_throttle: Duration,
    /// Deliver the first update of a quiet period immediately.
    pub leading_edge: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            update_throttle: DEFAULT_UPDATE_THROTTLE,
            leading_edge: true,
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the notification throttle interval.
    pub fn with_update_throttle(mut self, interval: Duration) -> Self {
        self.update_throttle = interval;
        self
    }

    /// Enable or disable leading-edge delivery.
    pub fn with_leading_edge(mut self, enabled: bool) -> Self {
        self.leading_edge = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_throttle.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "update_throttle",
                reason: "must be > 0".to_string(),
            });
        }
        if self.update_throttle > MAX_UPDATE_THROTTLE {
            return Err(ConfigError::InvalidValue {
                field: "update_throttle",
                reason: format!("must be <= {}ms", MAX_UPDATE_THROTTLE.as_millis()),
            });
        }
        Ok(())
    }
}

/// Shared cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Events buffered per subscriber before it starts lagging.
    pub event_capacity: usize,
    /// Freshness window for descriptors that do not set one.
    /// Zero means data is stale as soon as it lands.
    pub default_freshness: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            default_freshness: Duration::ZERO,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the default freshness window.
    pub fn with_default_freshness(mut self, window: Duration) -> Self {
        self.default_freshness = window;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// File form of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrickleConfig {
    pub loader: LoaderSection,
    pub cache: CacheSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderSection {
    pub update_throttle_ms: u64,
    pub leading_edge: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    pub event_capacity: usize,
    pub default_freshness_ms: u64,
}

impl Default for TrickleConfig {
    fn default() -> Self {
        Self {
            loader: LoaderSection {
                update_throttle_ms: DEFAULT_UPDATE_THROTTLE.as_millis() as u64,
                leading_edge: true,
            },
            cache: CacheSection {
                event_capacity: DEFAULT_EVENT_CAPACITY,
                default_freshness_ms: 0,
            },
        }
    }
}

impl TrickleConfig {
    /// Load from `path`, falling back to the file named by `TRICKLE_CONFIG`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(config_path_from_env)
            .ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: TrickleConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loader.update_throttle_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "loader.update_throttle_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if u128::from(self.loader.update_throttle_ms) > MAX_UPDATE_THROTTLE.as_millis() {
            return Err(ConfigError::InvalidValue {
                field: "loader.update_throttle_ms",
                reason: format!("must be <= {}", MAX_UPDATE_THROTTLE.as_millis()),
            });
        }
        if self.cache.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.event_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            update_throttle: Duration::from_millis(self.loader.update_throttle_ms),
            leading_edge: self.loader.leading_edge,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            event_capacity: self.cache.event_capacity,
            default_freshness: Duration::from_millis(self.cache.default_freshness_ms),
        }
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}
