//! Configuration management for Gatekeeper.
//!
//! Configuration is read from YAML. [`GatekeeperConfig::from_file`] layers
//! `GATEKEEPER__<SECTION>__<FIELD>` environment variables on top of the file,
//! e.g. `GATEKEEPER__STORE__URL=redis://cache:6379`.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{ExpiryMode, Policy, DEFAULT_MAX_COUNT, DEFAULT_RETRY_DELAY, DEFAULT_WINDOW};

/// Main configuration for Gatekeeper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Admission gate configuration
    #[serde(default)]
    pub gate: GateConfig,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Policies attached to individual operations
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,

    /// Policies attached to every operation matching a pattern
    #[serde(default)]
    pub patterns: Vec<BindingConfig>,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL; counters are kept in process memory when unset
    #[serde(default)]
    pub url: Option<String>,

    /// Prefix prepended to every rate limit key
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// Seconds between sweeps of expired in-memory counters
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: None,
            purge_interval_secs: default_purge_interval(),
        }
    }
}

impl StoreConfig {
    /// The in-memory purge interval as a duration.
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

fn default_purge_interval() -> u64 {
    60
}

/// Admission gate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// When the window ttl is attached to a counter
    #[serde(default)]
    pub expiry_mode: ExpiryMode,
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Seconds to wait before re-evaluating a denied call
    #[serde(default = "default_retry_delay")]
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_retry_delay(),
        }
    }
}

impl RetryConfig {
    /// The retry delay as a duration.
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY.as_secs()
}

/// A policy attachment.
///
/// In `bindings` the target is an operation name (`operation:`); in
/// `patterns` it is a glob over operation names (`pattern:`) where `*`
/// matches within one dot-separated segment and `**` matches across segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Operation name or pattern
    #[serde(alias = "operation", alias = "pattern")]
    pub target: String,

    /// First key segment, e.g. `smsService`
    pub namespace: String,

    /// Second key segment, e.g. `sendLimit`
    pub rule: String,

    /// Calls permitted per window
    #[serde(default = "default_limit_counts")]
    pub limit_counts: u64,

    /// Window length in seconds
    #[serde(default = "default_time_second")]
    pub time_second: u64,

    /// Field of the first call argument holding the business key
    pub key_field: String,

    /// Reject calls that carry no request context
    #[serde(default)]
    pub require_context: bool,
}

impl BindingConfig {
    /// Build and validate the policy for this binding.
    pub fn policy(&self) -> Result<Policy> {
        Policy::per_seconds(self.limit_counts, self.time_second).map_err(|e| {
            GatekeeperError::Configuration(format!("binding for `{}`: {}", self.target, e))
        })
    }
}

fn default_limit_counts() -> u64 {
    DEFAULT_MAX_COUNT
}

fn default_time_second() -> u64 {
    DEFAULT_WINDOW.as_secs()
}

impl GatekeeperConfig {
    /// Load configuration from a YAML file, with environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading gatekeeper configuration");

        let contents = std::fs::read_to_string(path)?;
        let settings = Config::builder()
            .add_source(File::from_str(&contents, FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("GATEKEEPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| GatekeeperError::Configuration(e.to_string()))?;

        let config: GatekeeperConfig = settings
            .try_deserialize()
            .map_err(|e| GatekeeperError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the store settings and every binding's policy.
    pub fn validate(&self) -> Result<()> {
        if self.store.purge_interval_secs == 0 {
            return Err(GatekeeperError::Configuration(
                "store purge_interval_secs must be greater than zero".to_string(),
            ));
        }
        for binding in self.bindings.iter().chain(&self.patterns) {
            binding.policy()?;
        }
        Ok(())
    }
}
