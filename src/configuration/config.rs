use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Command-line arguments.
///
/// Everything except the configuration file path is an override of a value that the
/// file also provides.
#[derive(Parser, Debug, Clone)]
#[command(name = "honeyshell")]
#[command(version)]
#[command(about = "SSH honeypot with transparent forwarding for allow-listed users")]
pub struct Args {
    /// Path of the TOML configuration file
    #[arg(env = "HONEYSHELL_CONFIG")]
    pub config_file: PathBuf,

    /// Overrides `server.port`
    #[arg(long)]
    pub port: Option<u16>,

    /// Overrides `backend.port`
    #[arg(long)]
    pub backend_port: Option<u16>,

    /// Raise the default log level to debug
    #[arg(long, short, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

/// Complete runtime configuration.
///
/// Loaded from a TOML file; every section is optional and falls back to its defaults.
///
/// ```toml
/// [server]
/// port = 2222
///
/// [backend]
/// host = "127.0.0.1"
/// port = 2223
///
/// [allow_list]
/// admin = "supersecret"
/// ```
#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
    pub geo: GeoConfig,
    pub reporting: ReportingConfig,
    pub allow_list: AllowList,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!(
            "Loaded configuration from {} ({} allow-listed user(s))",
            path.display(),
            config.allow_list.len()
        );
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies command-line overrides, then re-validates.
    pub fn apply_args(&mut self, args: &Args) -> Result<(), ConfigError> {
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(port) = args.backend_port {
            self.backend.port = port;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_ip(&self.server.listen_address, "server.listen_address")?;
        if self.server.port == 0 {
            return Err(ConfigError::NotInRange(String::from(
                "server.port must be between 1 and 65535",
            )));
        }
        if self.backend.host.trim().is_empty() {
            return Err(ConfigError::InvalidAddress(String::from(
                "backend.host must not be empty",
            )));
        }
        if self.backend.port == 0 {
            return Err(ConfigError::NotInRange(String::from(
                "backend.port must be between 1 and 65535",
            )));
        }
        if self.backend.connect_timeout_secs == 0 {
            return Err(ConfigError::NotInRange(String::from(
                "backend.connect_timeout_secs must be at least 1",
            )));
        }
        if !(1..=30).contains(&self.geo.timeout_secs) {
            return Err(ConfigError::NotInRange(format!(
                "geo.timeout_secs must be between 1 and 30, got {}",
                self.geo.timeout_secs
            )));
        }
        if self.reporting.enabled {
            parse_ip(&self.reporting.listen_address, "reporting.listen_address")?;
            if self.reporting.port == 0 {
                return Err(ConfigError::NotInRange(String::from(
                    "reporting.port must be between 1 and 65535",
                )));
            }
        }
        if !(50..=60_000).contains(&self.reporting.tail_poll_interval_ms) {
            return Err(ConfigError::NotInRange(format!(
                "reporting.tail_poll_interval_ms must be between 50 and 60000, got {}",
                self.reporting.tail_poll_interval_ms
            )));
        }
        if self.allow_list.is_empty() {
            warn!("Allow list is empty, every client will be routed to the decoy shell");
        }
        Ok(())
    }
}

fn parse_ip(value: &str, field: &str) -> Result<IpAddr, ConfigError> {
    value
        .parse::<IpAddr>()
        .map_err(|e| ConfigError::InvalidAddress(format!("{} '{}': {}", field, value, e)))
}
