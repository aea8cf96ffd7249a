//! # Network Listener Module
//!
//! This module accepts SSH connections for the honeypot and drives one [`SshConnection`] per
//! client. The SSH transport itself (key exchange, encryption, channel multiplexing) is
//! handled by `russh`; this module only provides the server identity and the per-connection
//! handler factory.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │ Incoming        │───▶│ NetworkListener  │───▶│ SshConnection    │
//! │ Connections     │    │                  │    │  └─ AuthGate     │
//! └─────────────────┘    │ - Host key       │    │  └─ Decoy/Proxy  │
//!                        │ - Server id      │    └──────────────────┘
//!                        └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use honeyshell::configuration::types::{BackendConfig, ServerConfig};
//! use honeyshell::configuration::AllowList;
//! use honeyshell::enrichment::GeoEnricher;
//! use honeyshell::error_handling::types::NetworkError;
//! use honeyshell::network::network_listener::NetworkListener;
//! use honeyshell::network::upstream::SshUpstream;
//! use honeyshell::session_management::HoneypotContext;
//! use honeyshell::storage::EventLogger;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), NetworkError> {
//!     let context = HoneypotContext::new(
//!         AllowList::new([("admin", "s3cret")]),
//!         EventLogger::new("logs/honeypot.log").unwrap(),
//!         GeoEnricher::disabled(),
//!         Duration::from_secs(10),
//!     );
//!     let upstream = Arc::new(SshUpstream::new(&BackendConfig::default()));
//!
//!     let mut listener = NetworkListener::new(context, upstream);
//!     listener.start_listening(&ServerConfig::default()).await
//! }
//! ```

use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use russh::keys::{Algorithm, PrivateKey};
use russh::server::Server;
use russh::{MethodKind, MethodSet, SshId};

use super::ssh_handler::SshConnection;
use crate::configuration::types::ServerConfig;
use crate::error_handling::types::NetworkError;
use crate::session_management::proxy_session::UpstreamConnector;
use crate::session_management::HoneypotContext;

/// The SSH front door of the honeypot.
///
/// `NetworkListener` is responsible for:
/// - Loading (or creating) the server host key
/// - Presenting a believable server identification string
/// - Creating one [`SshConnection`] per accepted client
///
/// Connections share nothing but the [`HoneypotContext`] and the backend connector.
pub struct NetworkListener<U: UpstreamConnector> {
    /// State shared by every connection: allow list, event log and geo lookups
    context: Arc<HoneypotContext>,

    /// Connector used by proxied sessions to reach the real backend
    upstream: Arc<U>,
}

impl<U: UpstreamConnector> NetworkListener<U> {
    /// Creates a new `NetworkListener`.
    ///
    /// # Arguments
    ///
    /// * `context` - Shared honeypot state handed to every connection
    /// * `upstream` - Backend connector for allow-listed clients
    pub fn new(context: Arc<HoneypotContext>, upstream: Arc<U>) -> Self {
        Self { context, upstream }
    }

    /// Builds the russh server configuration for `config`.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError::HostKeyError` if the host key can neither be read nor created.
    pub fn server_config(config: &ServerConfig) -> Result<russh::server::Config, NetworkError> {
        let host_key = load_or_generate_host_key(&config.host_key_path)?;

        let mut ssh_config = russh::server::Config::default();
        ssh_config.keys.push(host_key);
        ssh_config.server_id = SshId::Standard(config.server_id.clone());
        ssh_config.methods = MethodSet::from([MethodKind::Password].as_slice());
        ssh_config.auth_rejection_time = Duration::from_secs(1);
        ssh_config.auth_rejection_time_initial = Some(Duration::from_secs(0));
        Ok(ssh_config)
    }

    /// Accepts connections until the server fails.
    ///
    /// # Errors
    ///
    /// * `NetworkError::HostKeyError` if the host key is unusable
    /// * `NetworkError::BindError` if the listening socket cannot be bound
    /// * `NetworkError::ServerError` if accepting connections fails afterwards
    pub async fn start_listening(&mut self, config: &ServerConfig) -> Result<(), NetworkError> {
        let ssh_config = Arc::new(Self::server_config(config)?);
        let address = format!("{}:{}", config.listen_address, config.port);

        info!("SSH honeypot listening on {}", address);
        self.run_on_address(ssh_config, address.as_str())
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable | ErrorKind::PermissionDenied => {
                    NetworkError::BindError(e)
                }
                _ => NetworkError::ServerError(e),
            })
    }
}

impl<U: UpstreamConnector> Server for NetworkListener<U> {
    type Handler = SshConnection<U>;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        let peer = peer_addr.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        info!("New connection from {}", peer);
        SshConnection::new(Arc::clone(&self.context), Arc::clone(&self.upstream), peer)
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        debug!("Connection ended with error: {}", error);
    }
}

/// Loads the Ed25519 host key at `path`, generating and saving one when the file is absent.
pub fn load_or_generate_host_key(path: &Path) -> Result<PrivateKey, NetworkError> {
    if path.exists() {
        let pem = fs::read_to_string(path)
            .map_err(|e| NetworkError::HostKeyError(format!("{}: {}", path.display(), e)))?;
        return russh::keys::decode_secret_key(&pem, None)
            .map_err(|e| NetworkError::HostKeyError(format!("{}: {}", path.display(), e)));
    }

    warn!("No host key at {}, generating a new one", path.display());
    let key = PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519)
        .map_err(|e| NetworkError::HostKeyError(e.to_string()))?;
    save_host_key(&key, path)?;
    Ok(key)
}

fn save_host_key(key: &PrivateKey, path: &Path) -> Result<(), NetworkError> {
    let describe = |e: &dyn std::fmt::Display| {
        NetworkError::HostKeyError(format!("{}: {}", path.display(), e))
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| describe(&e))?;
        }
    }

    let mut pem = Vec::new();
    russh::keys::encode_pkcs8_pem(key, &mut pem).map_err(|e| describe(&e))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| describe(&e))?;
        file.write_all(&pem).map_err(|e| describe(&e))?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, &pem).map_err(|e| describe(&e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::AllowList;
    use crate::enrichment::GeoEnricher;
    use crate::network::upstream::SshUpstream;
    use crate::configuration::types::BackendConfig;
    use crate::storage::event_reader::read_events;
    use crate::storage::{Event, EventKind, EventLogger};
    use russh::ChannelMsg;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    struct TestClient;

    impl russh::client::Handler for TestClient {
        type Error = russh::Error;

        async fn check_server_key(
            &mut self,
            _server_public_key: &russh::keys::PublicKey,
        ) -> Result<bool, Self::Error> {
            Ok(true)
        }
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Reads channel output until `needle` shows up.
    async fn read_until(channel: &mut russh::Channel<russh::client::Msg>, needle: &str) -> String {
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !String::from_utf8_lossy(&seen).contains(needle) {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => seen.extend_from_slice(&data),
                    Some(_) => {}
                    None => break,
                }
            }
        })
        .await
        .unwrap();
        String::from_utf8_lossy(&seen).into_owned()
    }

    #[test]
    fn test_host_key_is_generated_once_and_reused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys").join("host_ed25519");

        let first = load_or_generate_host_key(&path).unwrap();
        assert!(path.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let second = load_or_generate_host_key(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn test_garbage_host_key_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host_key");
        fs::write(&path, "not a key").unwrap();

        assert!(matches!(
            load_or_generate_host_key(&path),
            Err(NetworkError::HostKeyError(_))
        ));
    }

    /// Starts a honeypot whose only allow-listed login is admin/s3cret and whose backend
    /// port has nothing listening on it.
    async fn start_honeypot(dir: &TempDir) -> u16 {
        let port = free_port().await;
        let config = ServerConfig {
            listen_address: String::from("127.0.0.1"),
            port,
            host_key_path: dir.path().join("host_key"),
            ..ServerConfig::default()
        };

        let context = HoneypotContext::new(
            AllowList::new([("admin", "s3cret")]),
            EventLogger::new(dir.path().join("honeypot.log")).unwrap(),
            GeoEnricher::disabled(),
            Duration::from_secs(1),
        );
        let upstream = Arc::new(SshUpstream::new(&BackendConfig {
            host: String::from("127.0.0.1"),
            port: free_port().await,
            connect_timeout_secs: 1,
        }));
        let mut listener = NetworkListener::new(context, upstream);
        tokio::spawn(async move {
            let _ = listener.start_listening(&config).await;
        });
        port
    }

    /// Connects and logs in, retrying while the server is still binding.
    async fn login(
        port: u16,
        user: &str,
        password: &str,
    ) -> russh::client::Handle<TestClient> {
        let mut handle = None;
        for _ in 0..50 {
            match russh::client::connect(
                Arc::new(russh::client::Config::default()),
                ("127.0.0.1", port),
                TestClient,
            )
            .await
            {
                Ok(h) => {
                    handle = Some(h);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
        let mut handle = handle.unwrap();
        let auth = handle.authenticate_password(user, password).await.unwrap();
        assert!(auth.success(), "every password is accepted");
        handle
    }

    #[tokio::test]
    async fn test_decoy_session_over_ssh() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("honeypot.log");
        let port = start_honeypot(&dir).await;
        let handle = login(port, "root", "toor").await;

        let mut channel = handle.channel_open_session().await.unwrap();
        channel
            .request_pty(false, "xterm", 80, 24, 0, 0, &[])
            .await
            .unwrap();
        channel.request_shell(false).await.unwrap();

        let banner = read_until(&mut channel, "root@server:~$ ").await;
        assert!(banner.starts_with("Welcome to Ubuntu 22.04.3 LTS\r\n"));

        channel.data(&b"whoami\r"[..]).await.unwrap();
        let reply = read_until(&mut channel, "root\r\nroot@server:~$ ").await;
        assert!(reply.contains("whoami\r\n"));

        let events = read_events(&log_path, 10, None).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), EventKind::LoginAttempt);
        match &events[1] {
            Event::Command { command, .. } => assert_eq!(command, "whoami"),
            other => panic!("expected a command, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exec_request_gets_failure_reply() {
        let dir = TempDir::new().unwrap();
        let port = start_honeypot(&dir).await;
        let handle = login(port, "root", "x").await;

        let mut channel = handle.channel_open_session().await.unwrap();
        channel.exec(true, "uname -a").await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Failure) => break true,
                    Some(ChannelMsg::Success) | None => break false,
                    Some(_) => {}
                }
            }
        })
        .await
        .unwrap();
        assert!(reply, "exec must be answered with a failure");

        // The login is recorded, the refused command is not.
        let events = read_events(&dir.path().join("honeypot.log"), 10, None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::LoginAttempt);
    }

    #[tokio::test]
    async fn test_unreachable_backend_over_ssh() {
        let dir = TempDir::new().unwrap();
        let port = start_honeypot(&dir).await;
        let handle = login(port, "admin", "s3cret").await;

        let mut channel = handle.channel_open_session().await.unwrap();
        channel
            .request_pty(false, "xterm", 80, 24, 0, 0, &[])
            .await
            .unwrap();
        channel.request_shell(false).await.unwrap();

        let (text, status) = tokio::time::timeout(Duration::from_secs(5), async {
            let mut seen = Vec::new();
            let mut status = None;
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => seen.extend_from_slice(&data),
                    Some(ChannelMsg::ExitStatus { exit_status }) => status = Some(exit_status),
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
            (String::from_utf8_lossy(&seen).into_owned(), status)
        })
        .await
        .unwrap();

        assert!(text.starts_with("Real SSH connection failed: "), "got {:?}", text);
        assert!(text.ends_with("\r\n"));
        assert_eq!(status, Some(0));

        let events = read_events(&dir.path().join("honeypot.log"), 10, None).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::LoginAttempt { username, password, .. } => {
                assert_eq!(username, "admin");
                assert_eq!(password, "s3cret");
            }
            other => panic!("expected a login attempt, got {:?}", other),
        }
    }
}
