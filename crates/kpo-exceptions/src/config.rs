//! Operator configuration
//!
//! Read from an optional TOML file; command-line flags override individual
//! fields afterwards. Every field has a serde default so a partial file is
//! valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jitter::{JitterScheduler, DEFAULT_MAX_JITTER_PERCENT, DEFAULT_REQUEUE_INTERVAL};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("destination namespace must be set")]
    MissingDestinationNamespace,

    #[error("max jitter percent must be between 0 and 100, got {0}")]
    JitterOutOfRange(u8),

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Top-level operator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Namespace every engine exception is written to.
    #[serde(default)]
    pub destination_namespace: String,

    /// Default background mode of written exceptions.
    #[serde(default)]
    pub background_mode: bool,

    #[serde(default = "default_max_jitter_percent")]
    pub max_jitter_percent: u8,

    /// Base interval between periodic re-checks of a source.
    #[serde(default = "default_requeue_interval_secs")]
    pub requeue_interval_secs: u64,

    /// Base retry delay after referenced policies were not cached yet.
    #[serde(default = "default_cache_miss_retry_secs")]
    pub cache_miss_retry_secs: u64,

    /// Service-account bypass maintained by the ClusterPolicy flow.
    #[serde(default)]
    pub bypass: BypassConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            destination_namespace: String::new(),
            background_mode: false,
            max_jitter_percent: default_max_jitter_percent(),
            requeue_interval_secs: default_requeue_interval_secs(),
            cache_miss_retry_secs: default_cache_miss_retry_secs(),
            bypass: BypassConfig::default(),
        }
    }
}

/// Exception letting a deployment service account create objects the
/// validate policies would otherwise block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassConfig {
    /// Kinds the service account may create. Empty disables the bypass.
    #[serde(default)]
    pub exception_kinds: Vec<String>,

    #[serde(default = "default_bypass_namespace")]
    pub namespace: String,

    #[serde(default = "default_bypass_service_account")]
    pub service_account: String,
}

impl Default for BypassConfig {
    fn default() -> Self {
        Self {
            exception_kinds: Vec::new(),
            namespace: default_bypass_namespace(),
            service_account: default_bypass_service_account(),
        }
    }
}

impl BypassConfig {
    pub fn is_enabled(&self) -> bool {
        !self.exception_kinds.is_empty()
    }
}

// Serde default functions
fn default_max_jitter_percent() -> u8 {
    DEFAULT_MAX_JITTER_PERCENT
}

fn default_requeue_interval_secs() -> u64 {
    DEFAULT_REQUEUE_INTERVAL.as_secs()
}

fn default_cache_miss_retry_secs() -> u64 {
    10
}

fn default_bypass_namespace() -> String {
    "giantswarm".to_string()
}

fn default_bypass_service_account() -> String {
    "chart-operator".to_string()
}

impl OperatorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load `path` if it exists, defaults otherwise. A present but broken
    /// file is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destination_namespace.trim().is_empty() {
            return Err(ConfigError::MissingDestinationNamespace);
        }
        if self.max_jitter_percent > 100 {
            return Err(ConfigError::JitterOutOfRange(self.max_jitter_percent));
        }
        if self.requeue_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval("requeue_interval_secs"));
        }
        if self.cache_miss_retry_secs == 0 {
            return Err(ConfigError::ZeroInterval("cache_miss_retry_secs"));
        }
        Ok(())
    }

    pub fn requeue_scheduler(&self) -> JitterScheduler {
        JitterScheduler::new(
            Duration::from_secs(self.requeue_interval_secs),
            self.max_jitter_percent,
        )
    }

    pub fn cache_miss_scheduler(&self) -> JitterScheduler {
        JitterScheduler::new(
            Duration::from_secs(self.cache_miss_retry_secs),
            self.max_jitter_percent,
        )
    }
}

/// Split comma-separated kind lists, as given to `--chart-operator-exception-kinds`.
/// Entries are trimmed; blanks and repeats are dropped.
pub fn parse_kind_list<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    let mut kinds: Vec<String> = Vec::new();
    for kind in values.iter().flat_map(|v| v.as_ref().split(',')) {
        let kind = kind.trim();
        if !kind.is_empty() && !kinds.iter().any(|k| k == kind) {
            kinds.push(kind.to_string());
        }
    }
    kinds
}
