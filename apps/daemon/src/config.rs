//! Daemon configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! The daemon talks to the accessory through a TCP bridge (a development
//! stand-in for the platform's secure socket stack), so the bridge
//! endpoints live here next to the accessory identity.

use std::path::Path;

use anyhow::{Context, Result};
use earlink_core::{RemoteAddr, TakeoverPrefs};
use serde::Deserialize;

/// Daemon configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address of the paired accessory.
    /// Override: `EARLINK_ACCESSORY`
    pub accessory: RemoteAddr,

    /// Address of the local adapter.
    /// Override: `EARLINK_LOCAL_ADAPTER`
    pub local_adapter: RemoteAddr,

    /// Host of the TCP bridge carrying the accessory channels.
    /// Override: `EARLINK_BRIDGE_HOST`
    pub bridge_host: String,

    /// Bridge port for the primary control channel.
    /// Override: `EARLINK_CONTROL_PORT`
    pub control_port: u16,

    /// Bridge port for the attribute channel.
    /// Override: `EARLINK_ATTRIBUTE_PORT`
    pub attribute_port: u16,

    /// Attempt an initial supervised connect at startup.
    pub connect_on_start: bool,

    /// Takeover preference toggles.
    pub takeover: TakeoverPrefs,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            accessory: RemoteAddr::new([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01]),
            local_adapter: RemoteAddr::new([0x10, 0x00, 0x00, 0x00, 0x00, 0x01]),
            bridge_host: "127.0.0.1".to_string(),
            control_port: 4820,
            attribute_port: 4821,
            connect_on_start: true,
            takeover: TakeoverPrefs::default(),
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("EARLINK_LOCAL_ADAPTER") {
            if let Ok(addr) = val.parse() {
                self.local_adapter = addr;
            }
        }

        if let Ok(val) = std::env::var("EARLINK_ATTRIBUTE_PORT") {
            if let Ok(port) = val.parse() {
                self.attribute_port = port;
            }
        }

        // EARLINK_ACCESSORY, EARLINK_BRIDGE_HOST and EARLINK_CONTROL_PORT
        // are handled by clap via #[arg(env = ...)] in main.rs.
    }

    /// Converts to earlink-core's Config type.
    pub fn to_core_config(&self) -> Result<earlink_core::Config> {
        earlink_core::Config::new(self.accessory, self.local_adapter, self.takeover.clone())
            .map_err(|reason| anyhow::anyhow!("invalid configuration: {reason}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_produce_a_valid_core_config() {
        let config = DaemonConfig::default();
        assert!(config.to_core_config().is_ok());
    }

    #[test]
    fn loads_yaml_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "accessory: \"AA:BB:CC:DD:EE:FF\"").unwrap();
        writeln!(file, "control_port: 9000").unwrap();

        let config = DaemonConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.accessory.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.control_port, 9000);
        // Unspecified fields keep their defaults.
        assert_eq!(config.attribute_port, 4821);
    }

    #[test]
    fn rejects_malformed_address() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "accessory: \"not-an-address\"").unwrap();
        assert!(DaemonConfig::load(Some(file.path())).is_err());
    }
}
