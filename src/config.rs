//! Configuration management for the monitor

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::modbus::{self, Domain};

/// Prefix of environment overrides, e.g. `MODBUS_MONITOR_GATEWAY__BASE_URL`
pub const ENV_PREFIX: &str = "MODBUS_MONITOR";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local API server
    pub server: ServerConfig,
    /// Remote gateway
    pub gateway: GatewayConfig,
    /// Per-domain polling
    pub polling: PollingConfig,
    /// Single-register writes
    pub write: WriteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP API host
    pub host: String,
    /// HTTP API port
    pub port: u16,
    /// Enable metrics endpoint
    pub metrics_enabled: bool,
    /// Directory with the dashboard front-end, served at `/`
    pub static_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the gateway, e.g. http://localhost:8080
    pub base_url: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub registers: ChannelConfig,
    pub coils: ChannelConfig,
    pub discrete_inputs: ChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Polling interval in milliseconds
    pub interval_ms: u64,
    /// Initial start address
    pub start_address: u16,
    /// Initial number of points
    pub count: u16,
    /// Poll from start-up
    pub auto_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteConfig {
    /// Highest writable register address
    pub max_address: u16,
    /// How long a success message stays visible
    pub message_ttl_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            metrics_enabled: true,
            static_dir: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            start_address: 0,
            count: 10,
            auto_refresh: true,
        }
    }
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            max_address: modbus::MAX_WRITE_ADDRESS,
            message_ttl_ms: 2000,
        }
    }
}

impl PollingConfig {
    pub fn for_domain(&self, domain: Domain) -> &ChannelConfig {
        match domain {
            Domain::Registers => &self.registers,
            Domain::Coils => &self.coils,
            Domain::DiscreteInputs => &self.discrete_inputs,
        }
    }
}

impl Config {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let url = &self.gateway.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!("gateway.base_url must start with http:// or https://, got {url:?}");
        }
        if self.gateway.timeout_ms == 0 {
            bail!("gateway.timeout_ms must be greater than 0");
        }

        for domain in Domain::ALL {
            let channel = self.polling.for_domain(domain);
            if channel.interval_ms == 0 {
                bail!("polling.{}.interval_ms must be greater than 0", domain);
            }
            modbus::validate(
                domain,
                i64::from(channel.start_address),
                i64::from(channel.count),
            )
            .with_context(|| format!("Invalid initial range for polling.{}", domain))?;
        }

        if self.write.message_ttl_ms == 0 {
            bail!("write.message_ttl_ms must be greater than 0");
        }

        Ok(())
    }
}

/// Load configuration from file or use defaults
pub fn load_config() -> Result<Config> {
    let config_path =
        std::env::var("MODBUS_MONITOR_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());

    if !Path::new(&config_path).exists() {
        tracing::warn!("Config file {} not found, using defaults", config_path);
    }

    load_config_from_path(Path::new(&config_path))
}

/// Load configuration from `path`, applying environment overrides
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    load_layered(path, ENV_PREFIX)
}

fn load_layered(path: &Path, env_prefix: &str) -> Result<Config> {
    let config: Config = ::config::Config::builder()
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read config file: {}", path.display()))?
        .try_deserialize()
        .with_context(|| "Failed to parse config file")?;

    config.validate()?;
    Ok(config)
}

/// Load configuration from a YAML string
pub fn load_config_from_str(yaml: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(yaml).with_context(|| "Failed to parse config")?;
    config.validate()?;
    Ok(config)
}
