//! Plan configuration
//!
//! Process-wide knobs for a [`Plan`](crate::Plan): duplicate-name policy,
//! worker count for parallel runs, and naming prefixes for synthesized names.
//! Loadable from TOML or from `PLNR_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// What to do when a registry insertion reuses an existing name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail with `DuplicateKey` (default)
    #[default]
    Reject,
    /// Replace the existing entry, discarding any cached value
    Overwrite,
}

impl FromStr for DuplicatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(ConfigError::InvalidValue {
                key: "duplicate_policy".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Plan configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Policy for duplicate names in all registries
    pub duplicate_policy: DuplicatePolicy,
    /// Worker count for parallel runs (`None` = available parallelism)
    pub workers: Option<usize>,
    /// Prefix for synthesized argset names
    pub argset_prefix: String,
    /// Prefix for synthesized analysis names
    pub analysis_prefix: String,
    /// Log each analysis outcome at info level during batch runs
    pub log_progress: bool,
}

impl PlanConfig {
    /// Environment variable for [`PlanConfig::workers`]
    pub const ENV_WORKERS: &'static str = "PLNR_WORKERS";
    /// Environment variable for [`PlanConfig::duplicate_policy`]
    pub const ENV_DUPLICATE_POLICY: &'static str = "PLNR_DUPLICATE_POLICY";
    /// Environment variable for [`PlanConfig::log_progress`]
    pub const ENV_LOG_PROGRESS: &'static str = "PLNR_LOG_PROGRESS";

    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With duplicate policy
    #[inline]
    #[must_use]
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// With fixed worker count
    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// With argset name prefix
    #[inline]
    #[must_use]
    pub fn with_argset_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.argset_prefix = prefix.into();
        self
    }

    /// With analysis name prefix
    #[inline]
    #[must_use]
    pub fn with_analysis_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.analysis_prefix = prefix.into();
        self
    }

    /// With per-analysis progress logging
    #[inline]
    #[must_use]
    pub fn with_log_progress(mut self, enabled: bool) -> Self {
        self.log_progress = enabled;
        self
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns error on malformed TOML or invalid values
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults overridden by `PLNR_*` environment variables
    ///
    /// # Errors
    /// Returns error if a variable is set to an invalid value
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup function
    pub(crate) fn merge_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(Self::ENV_WORKERS) {
            let workers = raw.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                key: Self::ENV_WORKERS.to_string(),
                value: raw.clone(),
            })?;
            self.workers = Some(workers);
        }
        if let Some(raw) = lookup(Self::ENV_DUPLICATE_POLICY) {
            self.duplicate_policy = raw.parse()?;
        }
        if let Some(raw) = lookup(Self::ENV_LOG_PROGRESS) {
            self.log_progress = matches!(raw.trim(), "1" | "true" | "yes" | "on");
        }
        self.validate()?;
        Ok(self)
    }

    /// Check invariants
    ///
    /// # Errors
    /// Returns error on zero workers or empty prefixes
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "workers".to_string(),
                value: "0".to_string(),
            });
        }
        if self.argset_prefix.is_empty() || self.analysis_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "prefix".to_string(),
                value: String::new(),
            });
        }
        Ok(())
    }

    /// Worker count to use for a parallel run
    #[must_use]
    pub fn resolve_workers(&self, requested: Option<usize>) -> usize {
        requested
            .or(self.workers)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
            .max(1)
    }
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Reject,
            workers: None,
            argset_prefix: "argset_".to_string(),
            analysis_prefix: "analysis_".to_string(),
            log_progress: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML
    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid value for a key
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}
