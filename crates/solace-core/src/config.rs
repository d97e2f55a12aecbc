//! Resiliency configuration.
//!
//! Every timeout, attempt count and threshold in the bootstrap and
//! monitoring paths is policy, not structure, and lives here with the
//! shipped defaults. Configuration is TOML with human-readable durations
//! (`"1s 500ms"`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::humantime_serde;
use crate::retry::{BackoffConfig, RetryConfig};

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML is invalid.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serialization failed.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The parsed values are inconsistent.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level resiliency configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ResilienceConfig {
    /// Bootstrap stage budgets and auth retry policy.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Background probe cadence and thresholds.
    #[serde(default)]
    pub probes: ProbeConfig,

    /// Watch-loop rate limiting.
    #[serde(default)]
    pub watch: WatchConfig,
}

impl ResilienceConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// values are inconsistent.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or the values are
    /// inconsistent.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validates cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap.auth.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "bootstrap.auth.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.probes.loading_warning_after >= self.probes.loading_critical_after {
            return Err(ConfigError::Validation(
                "probes.loading_warning_after must be below loading_critical_after".to_string(),
            ));
        }
        if self.probes.loading_poll_interval.is_zero() {
            return Err(ConfigError::Validation(
                "probes.loading_poll_interval must be positive".to_string(),
            ));
        }
        if self.probes.memory_poll_interval.is_zero() {
            return Err(ConfigError::Validation(
                "probes.memory_poll_interval must be positive".to_string(),
            ));
        }
        for (field, ratio) in [
            ("memory_warning_ratio", self.probes.memory_warning_ratio),
            ("memory_critical_ratio", self.probes.memory_critical_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) || ratio == 0.0 {
                return Err(ConfigError::Validation(format!(
                    "probes.{field} must be within (0, 1]"
                )));
            }
        }
        if self.probes.memory_warning_ratio >= self.probes.memory_critical_ratio {
            return Err(ConfigError::Validation(
                "probes.memory_warning_ratio must be below memory_critical_ratio".to_string(),
            ));
        }
        if self.watch.debounce >= self.watch.min_spacing {
            return Err(ConfigError::Validation(
                "watch.debounce must be below watch.min_spacing".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bootstrap stage budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    /// Budget for the initial backend reachability probe. On timeout the
    /// machine proceeds in offline-assumed mode.
    #[serde(default = "default_connectivity_timeout")]
    #[serde(with = "humantime_serde")]
    pub connectivity_timeout: Duration,

    /// Budget applied to each gracefully-skippable stage (auth, service
    /// probe). A stage that overruns is logged and skipped, never fatal.
    #[serde(default = "default_stage_timeout")]
    #[serde(with = "humantime_serde")]
    pub stage_timeout: Duration,

    /// Session-retrieval retry policy. Exhausting it is a valid outcome
    /// (anonymous mode), not an error.
    #[serde(default = "default_auth_retry")]
    pub auth: RetryConfig,
}

const fn default_connectivity_timeout() -> Duration {
    Duration::from_millis(1500)
}

const fn default_stage_timeout() -> Duration {
    Duration::from_secs(12)
}

fn default_auth_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        attempt_timeout: Duration::from_secs(3),
        backoff: BackoffConfig::Linear {
            initial_delay: Duration::from_millis(500),
            increment: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        },
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            connectivity_timeout: default_connectivity_timeout(),
            stage_timeout: default_stage_timeout(),
            auth: default_auth_retry(),
        }
    }
}

/// Background probe cadence and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Settle delay before the one-shot blank-surface inspection.
    #[serde(default = "default_blank_settle")]
    #[serde(with = "humantime_serde")]
    pub blank_settle: Duration,

    /// Settle delay before the one-shot framework-marker inspection.
    #[serde(default = "default_marker_settle")]
    #[serde(with = "humantime_serde")]
    pub marker_settle: Duration,

    /// Poll interval for the stuck-loading probe.
    #[serde(default = "default_loading_poll_interval")]
    #[serde(with = "humantime_serde")]
    pub loading_poll_interval: Duration,

    /// Continuous indicator presence beyond this raises a warning.
    #[serde(default = "default_loading_warning_after")]
    #[serde(with = "humantime_serde")]
    pub loading_warning_after: Duration,

    /// Continuous indicator presence beyond this raises a critical.
    #[serde(default = "default_loading_critical_after")]
    #[serde(with = "humantime_serde")]
    pub loading_critical_after: Duration,

    /// Poll interval for the memory-pressure probe.
    #[serde(default = "default_memory_poll_interval")]
    #[serde(with = "humantime_serde")]
    pub memory_poll_interval: Duration,

    /// Heap usage ratio that raises a warning.
    #[serde(default = "default_memory_warning_ratio")]
    pub memory_warning_ratio: f64,

    /// Heap usage ratio that raises a critical.
    #[serde(default = "default_memory_critical_ratio")]
    pub memory_critical_ratio: f64,
}

const fn default_blank_settle() -> Duration {
    Duration::from_secs(3)
}

const fn default_marker_settle() -> Duration {
    Duration::from_millis(500)
}

const fn default_loading_poll_interval() -> Duration {
    Duration::from_secs(2)
}

const fn default_loading_warning_after() -> Duration {
    Duration::from_secs(5)
}

const fn default_loading_critical_after() -> Duration {
    Duration::from_secs(10)
}

const fn default_memory_poll_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_memory_warning_ratio() -> f64 {
    0.75
}

const fn default_memory_critical_ratio() -> f64 {
    0.90
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            blank_settle: default_blank_settle(),
            marker_settle: default_marker_settle(),
            loading_poll_interval: default_loading_poll_interval(),
            loading_warning_after: default_loading_warning_after(),
            loading_critical_after: default_loading_critical_after(),
            memory_poll_interval: default_memory_poll_interval(),
            memory_warning_ratio: default_memory_warning_ratio(),
            memory_critical_ratio: default_memory_critical_ratio(),
        }
    }
}

/// Watch-loop rate limiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Quiet window used to coalesce a burst of critical signals into a
    /// single harness run.
    #[serde(default = "default_debounce")]
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,

    /// Minimum spacing between two harness runs, regardless of how often
    /// metrics flap.
    #[serde(default = "default_min_spacing")]
    #[serde(with = "humantime_serde")]
    pub min_spacing: Duration,
}

const fn default_debounce() -> Duration {
    Duration::from_secs(1)
}

const fn default_min_spacing() -> Duration {
    Duration::from_secs(10)
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            min_spacing: default_min_spacing(),
        }
    }
}
