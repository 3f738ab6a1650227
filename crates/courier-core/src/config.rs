//! Registry configuration, loadable from TOML.
//!
//! ```toml
//! retry_count = 3
//! publish_responses_whitelist = ["Pong"]
//!
//! [backoff]
//! base_delay_ms = 100
//! multiplier = 2.0
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Retries allowed before a message is dead-lettered.
    pub retry_count: u32,

    /// Response types that may be auto-routed to `{Response}.inq`.
    /// `None` allows every type.
    pub publish_responses_whitelist: Option<Vec<String>>,

    pub backoff: Option<BackoffConfig>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retry_count: RetryPolicy::DEFAULT_RETRY_COUNT,
            publish_responses_whitelist: None,
            backoff: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

impl RegistryConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(backoff) = &self.backoff
            && !(backoff.multiplier.is_finite() && backoff.multiplier >= 1.0)
        {
            return Err(ConfigError::Invalid(format!(
                "backoff.multiplier must be a finite number >= 1.0, got {}",
                backoff.multiplier
            )));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.retry_count);
        match &self.backoff {
            Some(b) => policy.with_backoff(Duration::from_millis(b.base_delay_ms), b.multiplier),
            None => policy,
        }
    }
}
