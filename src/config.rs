use std::collections::HashMap;
use thiserror::Error;

use crate::domain::Address;

/// Canonical contract addresses for one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub lending_core: Address,
    pub vault_factory: Address,
    pub public_allocator: Address,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub events_path: String,
    pub network: String,
    pub deployment: Deployment,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),
}

/// Static per-network deployment table. External configuration, not
/// accounting logic; NETWORK selects the row.
fn deployment_for(network: &str) -> Result<Deployment, ConfigError> {
    let (core, factory, allocator) = match network {
        "mainnet" => (
            "0xbbbbbbbbbb9cc5e90e3b3af64bdaf62c37eeffcb",
            "0xa9c3d3a366466fa809d1ae982fb2c46e5fc41101",
            "0xfd32fa2ca22c76dd6e550706ad913fc6ce91c75d",
        ),
        "base" => (
            "0xbbbbbbbbbb9cc5e90e3b3af64bdaf62c37eeffcb",
            "0xa9c3d3a366466fa809d1ae982fb2c46e5fc41101",
            "0xa090dd1a701408df1d4d0b85b716c87565f90467",
        ),
        other => return Err(ConfigError::UnknownNetwork(other.to_string())),
    };
    let parse = |label: &str, value: &str| {
        Address::parse(value).map_err(|e| {
            ConfigError::InvalidValue(label.to_string(), e.to_string())
        })
    };
    Ok(Deployment {
        lending_core: parse("lending_core", core)?,
        vault_factory: parse("vault_factory", factory)?,
        public_allocator: parse("public_allocator", allocator)?,
    })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let events_path = env_map
            .get("EVENTS_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("EVENTS_PATH".to_string()))?;

        let network = env_map
            .get("NETWORK")
            .cloned()
            .unwrap_or_else(|| "mainnet".to_string());

        let deployment = deployment_for(&network)?;

        Ok(Config {
            database_path,
            events_path,
            network,
            deployment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env() -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        env.insert("EVENTS_PATH".to_string(), "/tmp/events.ndjson".to_string());
        env
    }

    #[test]
    fn test_defaults_to_mainnet() {
        let config = Config::from_env_map(base_env()).unwrap();
        assert_eq!(config.network, "mainnet");
        assert!(!config.deployment.lending_core.is_zero());
    }

    #[test]
    fn test_missing_database_path_fails() {
        let mut env = base_env();
        env.remove("DATABASE_PATH");
        assert!(matches!(
            Config::from_env_map(env),
            Err(ConfigError::MissingEnv(_))
        ));
    }

    #[test]
    fn test_unknown_network_fails() {
        let mut env = base_env();
        env.insert("NETWORK".to_string(), "testnet-zz".to_string());
        assert!(matches!(
            Config::from_env_map(env),
            Err(ConfigError::UnknownNetwork(_))
        ));
    }
}
