use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub vapid_private_key: Option<String>,
    pub vapid_public_key: Option<String>,
    pub vapid_subject: Option<String>,
    pub backend_url: Option<String>,
    pub store_path: Option<PathBuf>,
    pub tuning: Tuning,
}

#[cfg(test)]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            vapid_private_key: None,
            vapid_public_key: None,
            vapid_subject: None,
            backend_url: None,
            store_path: None,
            tuning: Tuning::default(),
        }
    }
}

/// Optional knobs read from the `--config` TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tuning {
    pub delivery: DeliverySettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeliverySettings {
    pub ttl_secs: u32,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: u32,
    pub max_in_flight: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            request_timeout_secs: 10,
            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_factor: 4,
            max_in_flight: 8,
        }
    }
}

impl DeliverySettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Delay before retry number `attempt` (1-based): base, base·f, base·f², …
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        Duration::from_millis(self.backoff_base_ms)
            .saturating_mul(self.backoff_factor.saturating_pow(exponent))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSettings {
    pub immediate_secs: u64,
    pub missed_secs: u64,
    pub upcoming_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            immediate_secs: 60,
            missed_secs: 300,
            upcoming_secs: 600,
        }
    }
}

impl Tuning {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let tuning: Tuning = toml::from_str(contents)?;
        tuning.validate()?;
        Ok(tuning)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let delivery = &self.delivery;
        if delivery.max_attempts == 0 {
            return Err(ConfigError::InvalidSetting(
                "delivery.max_attempts must be at least 1".to_string(),
            ));
        }
        if delivery.max_in_flight == 0 {
            return Err(ConfigError::InvalidSetting(
                "delivery.max_in_flight must be at least 1".to_string(),
            ));
        }
        if delivery.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting(
                "delivery.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        let scheduler = &self.scheduler;
        if scheduler.immediate_secs == 0 || scheduler.missed_secs == 0 || scheduler.upcoming_secs == 0
        {
            return Err(ConfigError::InvalidSetting(
                "scheduler intervals must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
