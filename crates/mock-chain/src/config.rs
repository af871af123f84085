//! Node configuration.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use auction_module::PlatformConfig;
use decryption_coordinator::GatewayConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid listen address: {0}")]
    ListenAddr(String),

    #[error("Invalid platform config: {0}")]
    Platform(String),

    #[error("Invalid gateway config: {0}")]
    Gateway(String),
}

/// Node configuration, loaded from an optional JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub listen_addr: String,
    /// Clock value at genesis
    pub initial_timestamp: u64,
    /// Seconds added per `admin_advanceBlock`
    pub block_time: u64,
    pub platform: PlatformConfig,
    pub gateway: GatewayConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9944".to_string(),
            initial_timestamp: 0,
            block_time: 12,
            platform: PlatformConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from `path`, or use defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|_| ConfigError::ListenAddr(self.listen_addr.clone()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        self.platform
            .validate()
            .map_err(|e| ConfigError::Platform(e.to_string()))?;
        self.gateway
            .validate()
            .map_err(|e| ConfigError::Gateway(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: NodeConfig = serde_json::from_str(
            r#"{ "listen_addr": "0.0.0.0:8000", "gateway": { "threshold": 3, "total_holders": 5 } }"#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:8000");
        assert_eq!(config.block_time, 12);
        assert_eq!(config.gateway.threshold, 3);
        assert_eq!(config.gateway.resolve_timeout_ms, GatewayConfig::default().resolve_timeout_ms);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = NodeConfig {
            listen_addr: "not an address".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ListenAddr(_))));

        let mut config = NodeConfig::default();
        config.gateway.threshold = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Gateway(_))));
    }
}
