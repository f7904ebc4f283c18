//! Error types for TRICKLE operations

use crate::identity::ResourceKey;
use thiserror::Error;

/// Errors produced by a descriptor's fetch operation.
///
/// Cloneable so a single failure can be handed to every caller that joined a
/// coalesced materialization.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("not found")]
    NotFound,

    #[error("request failed: {reason}")]
    Failed { reason: String },

    #[error("fetch aborted: {reason}")]
    Aborted { reason: String },
}

impl FetchError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Failures surfaced through a snapshot's `error` field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("materialization failed for {key}: {source}")]
    Materialization {
        key: ResourceKey,
        #[source]
        source: FetchError,
    },
}

impl LoadError {
    /// Key of the resource whose materialization failed.
    pub fn key(&self) -> &ResourceKey {
        match self {
            Self::Materialization { key, .. } => key,
        }
    }

    /// The underlying fetch failure.
    pub fn fetch_error(&self) -> &FetchError {
        match self {
            Self::Materialization { source, .. } => source,
        }
    }
}

/// Resource key construction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Resource key is not serializable: {reason}")]
    Unserializable { reason: String },
}

/// Errors from the loader handle itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Loader driver has stopped")]
    Closed,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (pass one or set TRICKLE_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for all TRICKLE errors.
#[derive(Debug, Error)]
pub enum TrickleError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for TRICKLE operations.
pub type TrickleResult<T> = Result<T, TrickleError>;

// =============================================================================
// TESTS
// =============================================================================
