use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    pub port: u16,
    pub host_key_path: PathBuf,
    pub server_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: String::from("0.0.0.0"),
            port: 2222,
            host_key_path: PathBuf::from("keys/ssh_host_ed25519_key"),
            server_id: String::from("SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.4"),
        }
    }
}

/// The genuine SSH service that allow-listed users are relayed to.
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 2223,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub event_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            event_log_path: PathBuf::from("logs/honeypot.log"),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct GeoConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: String::from("http://ip-api.com/json"),
            timeout_secs: 4,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct ReportingConfig {
    pub enabled: bool,
    pub listen_address: String,
    pub port: u16,
    pub tail_poll_interval_ms: u64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: String::from("127.0.0.1"),
            port: 8000,
            tail_poll_interval_ms: 1000,
        }
    }
}

/// Username/password pairs routed to the real backend instead of the decoy.
#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
#[serde(transparent)]
pub struct AllowList(HashMap<String, String>);

impl AllowList {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn matches(&self, username: &str, password: &str) -> bool {
        self.0
            .get(username)
            .is_some_and(|expected| expected == password)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
