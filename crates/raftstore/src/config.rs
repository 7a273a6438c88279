//! Store configuration
//!
//! YAML configuration for the shard store, module-organized with defaults
//! and field-level merge.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Shard store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Deferred replica destruction
    #[serde(default)]
    pub destroy: DestroyConfig,
}

impl StoreConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: StoreConfig) {
        self.destroy.merge(other.destroy);
    }
}

/// Destroy watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyConfig {
    /// Poll interval between safety checks (milliseconds)
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Give up persisting the tombstone after this many failed attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_check_interval_ms() -> u64 {
    100
}

fn default_max_attempts() -> u32 {
    30
}

impl Default for DestroyConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl DestroyConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    fn merge(&mut self, other: Self) {
        if other.check_interval_ms > 0 {
            self.check_interval_ms = other.check_interval_ms;
        }
        if other.max_attempts > 0 {
            self.max_attempts = other.max_attempts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.destroy.check_interval_ms, 100);
        assert_eq!(config.destroy.max_attempts, 30);
    }

    #[test]
    fn test_from_yaml() {
        let config = StoreConfig::from_yaml("destroy:\n  check_interval_ms: 20\n").unwrap();
        assert_eq!(config.destroy.check_interval_ms, 20);
        assert_eq!(config.destroy.max_attempts, 30);
    }

    #[test]
    fn test_merge() {
        let mut config = StoreConfig::default();
        config.merge(StoreConfig::from_yaml("destroy:\n  max_attempts: 5\n").unwrap());
        assert_eq!(config.destroy.max_attempts, 5);
        assert_eq!(config.destroy.check_interval_ms, 100);
    }
}
