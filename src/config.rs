//! Application configuration

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::acquire::DeviceProfile;
use crate::errors::PresenceError;
use crate::recency::DEFAULT_RECENCY_THRESHOLD;
use crate::store::DEFAULT_SWEEP_MAX_AGE;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub url: String,
    /// How often the reclamation sweep runs.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: Duration,
    /// Age past which abandoned records are deleted.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_sweep_max_age")]
    pub sweep_max_age: Duration,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct PresenceConfig {
    /// Age past which a presence entry is displayed as offline.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_recency_threshold")]
    pub recency_threshold: Duration,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AcquisitionConfig {
    #[serde(default)]
    pub profile: DeviceProfile,
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_sweep_max_age() -> Duration {
    DEFAULT_SWEEP_MAX_AGE
}

fn default_recency_threshold() -> Duration {
    DEFAULT_RECENCY_THRESHOLD
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            recency_threshold: DEFAULT_RECENCY_THRESHOLD,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("BUSPRESENCE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), PresenceError> {
        self.store.validate()?;
        self.presence.validate()?;
        Ok(())
    }
}

impl StoreConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), PresenceError> {
        if self.url.is_empty() {
            return Err(PresenceError::ConfigurationError {
                message: "Store url cannot be empty".to_string(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(PresenceError::ConfigurationError {
                message: "Sweep interval must be greater than zero".to_string(),
            });
        }
        if self.sweep_max_age.is_zero() {
            return Err(PresenceError::ConfigurationError {
                message: "Sweep max age must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl PresenceConfig {
    pub fn validate(&self) -> Result<(), PresenceError> {
        if self.recency_threshold.is_zero() {
            return Err(PresenceError::ConfigurationError {
                message: "Recency threshold must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
