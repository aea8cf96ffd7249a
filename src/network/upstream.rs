//! SSH client side of proxied sessions.
//!
//! [`SshUpstream`] opens a password-authenticated interactive shell on the configured
//! backend. The backend's host key is not verified: it is a fixed, operator-chosen peer.

use std::sync::Arc;

use log::{debug, trace};
use russh::client;
use russh::{ChannelMsg, Disconnect};

use crate::configuration::types::BackendConfig;
use crate::error_handling::types::UpstreamError;
use crate::session_management::proxy_session::{
    UpstreamConnector, UpstreamEvent, UpstreamLink, UpstreamRequest,
};

struct BackendClient;

impl client::Handler for BackendClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub struct SshUpstream {
    host: String,
    port: u16,
    config: Arc<client::Config>,
}

impl SshUpstream {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            config: Arc::new(client::Config::default()),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl UpstreamConnector for SshUpstream {
    type Link = SshUpstreamLink;

    async fn connect(&self, request: &UpstreamRequest) -> Result<SshUpstreamLink, UpstreamError> {
        debug!("Connecting to backend {} as {:?}", self.address(), request.username);
        let mut handle = client::connect(
            Arc::clone(&self.config),
            (self.host.as_str(), self.port),
            BackendClient,
        )
        .await?;

        let auth = handle
            .authenticate_password(request.username.as_str(), request.password.as_str())
            .await?;
        if !auth.success() {
            return Err(UpstreamError::Rejected);
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| UpstreamError::Channel(e.to_string()))?;
        channel
            .request_pty(false, &request.term, request.cols, request.rows, 0, 0, &[])
            .await
            .map_err(|e| UpstreamError::Channel(e.to_string()))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| UpstreamError::Channel(e.to_string()))?;

        Ok(SshUpstreamLink {
            handle,
            channel,
            closed: false,
        })
    }
}

pub struct SshUpstreamLink {
    handle: client::Handle<BackendClient>,
    channel: russh::Channel<client::Msg>,
    closed: bool,
}

impl UpstreamLink for SshUpstreamLink {
    async fn next_event(&mut self) -> UpstreamEvent {
        if self.closed {
            return UpstreamEvent::Closed;
        }
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => return UpstreamEvent::Data(data.to_vec()),
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return UpstreamEvent::Data(data.to_vec())
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    return UpstreamEvent::ExitStatus(exit_status)
                }
                Some(ChannelMsg::Eof) => return UpstreamEvent::Eof,
                Some(ChannelMsg::Close) | None => {
                    self.closed = true;
                    return UpstreamEvent::Closed;
                }
                Some(other) => trace!("Ignoring backend message {:?}", other),
            }
        }
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), UpstreamError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| UpstreamError::Channel(e.to_string()))
    }

    async fn send_eof(&mut self) -> Result<(), UpstreamError> {
        self.channel
            .eof()
            .await
            .map_err(|e| UpstreamError::Channel(e.to_string()))
    }

    async fn resize(&mut self, cols: u32, rows: u32) -> Result<(), UpstreamError> {
        self.channel
            .window_change(cols, rows, 0, 0)
            .await
            .map_err(|e| UpstreamError::Channel(e.to_string()))
    }

    async fn close(&mut self) {
        self.closed = true;
        let _ = self.channel.close().await;
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
    }
}
