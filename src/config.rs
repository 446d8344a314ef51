//! Simulator configuration.
//!
//! Loaded from a JSON file where every field is optional, then overridden by
//! command line arguments. Call [`SimulatorConfig::validate`] before use.

use crate::profile::MIN_REGISTER_COUNT;
use crate::server::{ServerConfig, UnitIdMode};
use crate::store::DEFAULT_REGISTER_COUNT;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub bind_address: String,
    pub port: u16,
    pub unit_id: u8,
    pub unit_id_mode: UnitIdMode,
    pub register_count: u16,
    pub tick_interval_ms: u64,
    pub load_power_profile: bool,
    pub simulation_enabled: bool,
    pub log_level: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5002,
            unit_id: 254,
            unit_id_mode: UnitIdMode::Permissive,
            register_count: DEFAULT_REGISTER_COUNT,
            tick_interval_ms: 1000,
            load_power_profile: true,
            simulation_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

/// Command line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub unit_id: Option<u8>,
    pub unit_id_mode: Option<UnitIdMode>,
    pub register_count: Option<u16>,
    pub tick_interval_ms: Option<u64>,
    pub no_profile: bool,
    pub no_simulation: bool,
    pub log_level: Option<String>,
}

impl SimulatorConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading configuration from {:?}", path);
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn apply_args(&mut self, overrides: &ConfigOverrides) {
        if let Some(address) = &overrides.bind_address {
            debug!("Overriding bind address from command line: {}", address);
            self.bind_address = address.clone();
        }
        if let Some(port) = overrides.port {
            debug!("Overriding port from command line: {}", port);
            self.port = port;
        }
        if let Some(unit_id) = overrides.unit_id {
            self.unit_id = unit_id;
        }
        if let Some(mode) = overrides.unit_id_mode {
            self.unit_id_mode = mode;
        }
        if let Some(count) = overrides.register_count {
            self.register_count = count;
        }
        if let Some(interval) = overrides.tick_interval_ms {
            self.tick_interval_ms = interval;
        }
        if overrides.no_profile {
            self.load_power_profile = false;
        }
        if overrides.no_simulation {
            self.simulation_enabled = false;
        }
        if let Some(level) = &overrides.log_level {
            self.log_level = level.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        self.tracing_level()?;
        if self.register_count == 0 {
            return Err(ConfigError::Invalid("register_count must be at least 1".to_string()));
        }
        if self.load_power_profile && self.register_count < MIN_REGISTER_COUNT {
            return Err(ConfigError::Invalid(format!(
                "the power profile needs register_count >= {MIN_REGISTER_COUNT}, got {}",
                self.register_count
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad bind address '{}'", self.bind_address)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn tracing_level(&self) -> Result<tracing::Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad log level '{}'", self.log_level)))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            unit_id: self.unit_id,
            unit_id_mode: self.unit_id_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulatorConfig::default();
        assert_eq!(config.port, 5002);
        assert_eq!(config.unit_id, 254);
        assert_eq!(config.register_count, 500);
        assert_eq!(config.unit_id_mode, UnitIdMode::Permissive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SimulatorConfig::from_json(r#"{"port": 1502, "unit_id_mode": "strict"}"#).unwrap();
        assert_eq!(config.port, 1502);
        assert_eq!(config.unit_id_mode, UnitIdMode::Strict);
        assert_eq!(config.tick_interval_ms, 1000);
    }

    #[test]
    fn test_overrides_win() {
        let mut config = SimulatorConfig::default();
        config.apply_args(&ConfigOverrides {
            port: Some(0),
            bind_address: Some("127.0.0.1".to_string()),
            no_simulation: true,
            ..ConfigOverrides::default()
        });
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:0");
        assert!(!config.simulation_enabled);
        assert!(config.load_power_profile);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = SimulatorConfig::default();
        config.bind_address = "not-an-ip".to_string();
        assert!(config.validate().is_err());

        let mut config = SimulatorConfig::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = SimulatorConfig::default();
        config.register_count = 50;
        assert!(config.validate().is_err());
        config.load_power_profile = false;
        assert!(config.validate().is_ok());

        let mut config = SimulatorConfig::default();
        config.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SimulatorConfig::from_file("/nonexistent/iedsim.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
