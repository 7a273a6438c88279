//! Pilot configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Coordinator-side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PilotConfig {
    /// Mailbox capacity of each leader heartbeat stream
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

fn default_stream_buffer() -> usize {
    64
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl PilotConfig {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_yaml() {
        assert_eq!(PilotConfig::default().stream_buffer, 64);
        let config = PilotConfig::from_yaml("stream_buffer: 8\n").unwrap();
        assert_eq!(config.stream_buffer, 8);
    }
}
