use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidAddress(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidAddress(e) => write!(f, "Address error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    HostKeyError(String),
    ServerError(std::io::Error),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::HostKeyError(e) => write!(f, "Host key error: {}", e),
            NetworkError::ServerError(e) => write!(f, "SSH server error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Failures of the event log. The logger counts these; they never reach a client.
#[derive(Debug)]
pub enum StorageError {
    WriteFailed(std::io::Error),
    ReadFailed(std::io::Error),
    SerializeFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::SerializeFailed(e) => write!(f, "Event serialization failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

/// Reasons a geolocation lookup produced nothing. Internal to the enricher.
#[derive(Debug)]
pub enum GeoError {
    Timeout,
    Transport(String),
    BadStatus(String),
    Malformed(String),
}

impl fmt::Display for GeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoError::Timeout => write!(f, "Geo lookup timed out"),
            GeoError::Transport(e) => write!(f, "Geo lookup transport error: {}", e),
            GeoError::BadStatus(e) => write!(f, "Geo lookup unsuccessful: {}", e),
            GeoError::Malformed(e) => write!(f, "Geo lookup returned malformed data: {}", e),
        }
    }
}

impl std::error::Error for GeoError {}

#[derive(Debug)]
pub enum UpstreamError {
    Connect(String),
    Rejected,
    Channel(String),
    Timeout,
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Connect(e) => write!(f, "{}", e),
            UpstreamError::Rejected => write!(f, "Permission denied"),
            UpstreamError::Channel(e) => write!(f, "session setup failed: {}", e),
            UpstreamError::Timeout => write!(f, "connection timed out"),
        }
    }
}

impl std::error::Error for UpstreamError {}

impl From<russh::Error> for UpstreamError {
    fn from(err: russh::Error) -> Self {
        UpstreamError::Connect(err.to_string())
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
    StorageError(StorageError),
    WebError(WebError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<NetworkError> for ControllerError {
    fn from(err: NetworkError) -> Self {
        ControllerError::NetworkError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<WebError> for ControllerError {
    fn from(err: WebError) -> Self {
        ControllerError::WebError(err)
    }
}
