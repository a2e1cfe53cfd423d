/// Configuration management for faro
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Main faro configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection pool configuration
    pub pool: PoolConfig,
    /// Routing topology configuration
    pub routing: RoutingConfig,
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum idle connections cached per host (0 = never cache)
    pub limit: usize,
}

/// Routing topology configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Known hosts (`address[:port]`), head = write primary for replica sets
    pub hosts: Vec<String>,
    /// Host to shard keys multimap for shard index construction
    #[serde(default)]
    pub shards: HashMap<String, Vec<String>>,
    /// Retry budget for replica-set calls on unsuccessful responses
    #[serde(default)]
    pub retry: u32,
    /// Maximum same-host redirect hops followed per call
    #[serde(default)]
    pub redirects: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolConfig { limit: 0 },
            routing: RoutingConfig {
                hosts: vec!["localhost:8080".to_string()],
                shards: HashMap::new(),
                retry: 0,
                redirects: 0,
            },
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routing.hosts.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one host is required".to_string(),
            ));
        }

        for host in &self.routing.hosts {
            if host.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "host entries cannot be empty".to_string(),
                ));
            }
        }

        for (host, keys) in &self.routing.shards {
            if host.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "shard map hosts cannot be empty".to_string(),
                ));
            }
            if keys.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "shard map entry for {host} must list at least one key"
                )));
            }
        }

        Ok(())
    }

    /// Flatten the host to keys multimap into (host, key) pairs for
    /// shard index construction.
    pub fn shard_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (host, keys) in &self.routing.shards {
            for key in keys {
                pairs.push((host.clone(), key.clone()));
            }
        }
        pairs
    }
}
