// Bridged configuration
use anyhow::{anyhow, Result};
use ghostbridge_shared::types::{ChannelConfig, ChannelType};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use zns::ZnsConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Network and TLS configuration
    pub network: NetworkConfig,

    /// Backend channels keyed by type; fixed at startup
    pub channels: Vec<ChannelConfig>,

    /// Embedded ZNS subsystem configuration
    #[serde(default)]
    pub zns: ZnsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub server_address: String,
    pub http2_port: u16,
    pub http3_port: u16,
    /// PEM certificate chain; unset means a self-signed dev identity
    pub cert_file: Option<PathBuf>,
    /// PEM private key; unset means a self-signed dev identity
    pub key_file: Option<PathBuf>,
    pub max_connections: usize,
    pub connection_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "0.0.0.0".to_string(),
            http2_port: 9090,
            http3_port: 443,
            cert_file: None,
            key_file: None,
            max_connections: 1_000,
            connection_timeout_ms: 30_000,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            channels: default_channels(),
            zns: ZnsConfig::default(),
        }
    }
}

fn default_channels() -> Vec<ChannelConfig> {
    let channel = |channel_type: ChannelType, port: u16| ChannelConfig {
        channel_type,
        service_endpoint: format!("http://127.0.0.1:{}", port),
        max_streams: 256,
        timeout_ms: 10_000,
        encryption_required: false,
    };
    vec![
        channel(ChannelType::Wallet, 3001),
        channel(ChannelType::Identity, 3002),
        channel(ChannelType::Ledger, 3003),
        channel(ChannelType::Dns, 3004),
        channel(ChannelType::Contracts, 3005),
        channel(ChannelType::Proxy, 3006),
    ]
}

impl BridgeConfig {
    /// Load configuration from a TOML or JSON file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        if path.ends_with(".toml") {
            toml::from_str(&content).map_err(|e| anyhow!("Failed to parse TOML config: {}", e))
        } else if path.ends_with(".json") {
            serde_json::from_str(&content)
                .map_err(|e| anyhow!("Failed to parse JSON config: {}", e))
        } else {
            toml::from_str(&content)
                .or_else(|_: toml::de::Error| serde_json::from_str(&content))
                .map_err(|e| anyhow!("Failed to parse config file (tried TOML and JSON): {}", e))
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let content = if path.ends_with(".json") {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };
        std::fs::write(path, content)
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;
        Ok(())
    }

    /// Local testing profile: loopback bind, high ports, dev TLS
    pub fn testnet() -> Self {
        let mut config = Self::default();
        config.network.server_address = "127.0.0.1".to_string();
        config.network.http2_port = 19_090;
        config.network.http3_port = 14_433;
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.max_connections == 0 {
            return Err(anyhow!("network.max_connections must be greater than 0"));
        }
        if self.network.connection_timeout_ms == 0 {
            return Err(anyhow!("network.connection_timeout_ms must be greater than 0"));
        }
        if self.network.http2_port == self.network.http3_port
            && self.network.http2_port != 0
        {
            // Different transports, but sharing a port number confuses
            // operators and tooling
            return Err(anyhow!("http2_port and http3_port must differ"));
        }
        if self.network.cert_file.is_some() != self.network.key_file.is_some() {
            return Err(anyhow!("cert_file and key_file must be set together"));
        }
        for channel in &self.channels {
            if channel.service_endpoint.is_empty() {
                return Err(anyhow!(
                    "channel {} has an empty service endpoint",
                    channel.channel_type
                ));
            }
            if channel.max_streams == 0 {
                return Err(anyhow!(
                    "channel {} must allow at least one stream",
                    channel.channel_type
                ));
            }
        }
        self.zns.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BridgeConfig::default().validate().is_ok());
        assert!(BridgeConfig::testnet().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_shared_ports() {
        let mut config = BridgeConfig::default();
        config.network.http3_port = config.network.http2_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_paired_tls_files() {
        let mut config = BridgeConfig::default();
        config.network.cert_file = Some(PathBuf::from("/tmp/cert.pem"));
        assert!(config.validate().is_err());
        config.network.key_file = Some(PathBuf::from("/tmp/key.pem"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_round_trip_through_toml_and_json() {
        let config = BridgeConfig::default();
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("bridge.toml");
        config.save_to_file(toml_path.to_str().unwrap()).unwrap();
        let from_toml = BridgeConfig::from_file(toml_path.to_str().unwrap()).unwrap();
        assert_eq!(from_toml.network.http2_port, config.network.http2_port);
        assert_eq!(from_toml.channels.len(), config.channels.len());

        let json_path = dir.path().join("bridge.json");
        config.save_to_file(json_path.to_str().unwrap()).unwrap();
        let from_json = BridgeConfig::from_file(json_path.to_str().unwrap()).unwrap();
        assert_eq!(from_json.network.max_connections, config.network.max_connections);
    }
}
