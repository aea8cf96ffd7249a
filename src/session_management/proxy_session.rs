//! Transparent relay between an allow-listed client and the real backend.
//!
//! The backend is reached through [`UpstreamConnector`] with the very credentials the
//! client typed. Once connected, a relay task owns the upstream link and the client-facing
//! channel: upstream output is forwarded in order, client input arrives over an mpsc
//! queue. Dropping the session closes the queue, which closes the upstream connection.
//! Nothing typed in a proxied session is inspected or logged.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::sync::mpsc;

use super::session::{PtyRequest, SessionFsm, ShellChannel};
use crate::error_handling::types::UpstreamError;

/// Everything needed to open the backend side of a proxied session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub username: String,
    pub password: String,
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Data(Vec<u8>),
    ExitStatus(u32),
    Eof,
    Closed,
}

/// Opens interactive sessions on the real backend.
pub trait UpstreamConnector: Send + Sync + 'static {
    type Link: UpstreamLink;

    /// Connects, authenticates and starts a shell on a terminal described by `request`.
    fn connect(
        &self,
        request: &UpstreamRequest,
    ) -> impl Future<Output = Result<Self::Link, UpstreamError>> + Send;
}

/// An established backend shell.
pub trait UpstreamLink: Send + 'static {
    /// Next thing the backend did. Must be cancel safe; returns `Closed` forever once gone.
    fn next_event(&mut self) -> impl Future<Output = UpstreamEvent> + Send;

    fn send_data(&mut self, data: &[u8]) -> impl Future<Output = Result<(), UpstreamError>> + Send;

    /// Closes the write side only; output keeps flowing.
    fn send_eof(&mut self) -> impl Future<Output = Result<(), UpstreamError>> + Send;

    fn resize(&mut self, cols: u32, rows: u32)
        -> impl Future<Output = Result<(), UpstreamError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug)]
enum RelayInput {
    Data(Vec<u8>),
    Eof,
    Resize { cols: u32, rows: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Init,
    Relaying,
    Closed,
}

pub struct ProxySession<R, U: UpstreamConnector> {
    username: String,
    password: String,
    client_ip: IpAddr,
    connector: Arc<U>,
    downstream: Option<R>,
    pty: PtyRequest,
    connect_timeout: Duration,
    relay: Option<mpsc::UnboundedSender<RelayInput>>,
    state: ProxyState,
}

impl<R, U> ProxySession<R, U>
where
    R: ShellChannel + 'static,
    U: UpstreamConnector,
{
    pub fn new(
        username: &str,
        password: &str,
        client_ip: IpAddr,
        connector: Arc<U>,
        downstream: R,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_ip,
            connector,
            downstream: Some(downstream),
            pty: PtyRequest::default(),
            connect_timeout,
            relay: None,
            state: ProxyState::Init,
        }
    }

    pub fn state(&self) -> ProxyState {
        self.state
    }

    /// Remembers the client's terminal so the backend gets the same one.
    pub fn on_pty(&mut self, pty: PtyRequest) {
        self.pty = pty;
    }

    pub fn on_resize(&mut self, cols: u32, rows: u32) {
        self.pty.cols = cols;
        self.pty.rows = rows;
        self.forward(RelayInput::Resize { cols, rows });
    }

    fn forward(&mut self, input: RelayInput) {
        if let Some(tx) = &self.relay {
            if tx.send(input).is_err() {
                trace!("Relay for {} already finished", self.client_ip);
                self.relay = None;
            }
        }
    }

    fn request(&self) -> UpstreamRequest {
        UpstreamRequest {
            username: self.username.clone(),
            password: self.password.clone(),
            term: self.pty.term.clone(),
            cols: self.pty.cols,
            rows: self.pty.rows,
        }
    }
}

impl<R, U> SessionFsm for ProxySession<R, U>
where
    R: ShellChannel + 'static,
    U: UpstreamConnector,
{
    async fn on_open<O: ShellChannel>(&mut self, out: &mut O) {
        if self.state != ProxyState::Init {
            return;
        }
        let request = self.request();
        let connected =
            match tokio::time::timeout(self.connect_timeout, self.connector.connect(&request))
                .await
            {
                Ok(res) => res,
                Err(_) => Err(UpstreamError::Timeout),
            };

        let mut link = match connected {
            Ok(link) => link,
            Err(e) => {
                warn!(
                    "Backend session for {}@{} failed: {}",
                    self.username, self.client_ip, e
                );
                let message = format!("Real SSH connection failed: {}\r\n", e);
                out.write(message.as_bytes()).await;
                out.exit(0).await;
                self.state = ProxyState::Closed;
                return;
            }
        };
        let Some(downstream) = self.downstream.take() else {
            link.close().await;
            self.state = ProxyState::Closed;
            return;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.relay = Some(tx);
        self.state = ProxyState::Relaying;
        info!(
            "Proxying {}@{} to the backend ({})",
            self.username, self.client_ip, request.term
        );
        tokio::spawn(relay(link, downstream, rx, self.client_ip));
    }

    async fn on_data<O: ShellChannel>(&mut self, data: &[u8], _out: &mut O) {
        self.forward(RelayInput::Data(data.to_vec()));
    }

    async fn on_eof<O: ShellChannel>(&mut self, _out: &mut O) {
        self.forward(RelayInput::Eof);
    }

    fn on_close(&mut self) {
        self.relay = None;
        self.state = ProxyState::Closed;
    }
}

/// Pumps bytes both ways until either end goes away.
async fn relay<L, R>(
    mut link: L,
    mut downstream: R,
    mut input: mpsc::UnboundedReceiver<RelayInput>,
    client_ip: IpAddr,
) where
    L: UpstreamLink,
    R: ShellChannel,
{
    let mut exit_status = None;
    loop {
        tokio::select! {
            event = link.next_event() => match event {
                UpstreamEvent::Data(bytes) => downstream.write(&bytes).await,
                UpstreamEvent::ExitStatus(status) => exit_status = Some(status),
                UpstreamEvent::Eof => trace!("Backend sent EOF for {}", client_ip),
                UpstreamEvent::Closed => break,
            },
            msg = input.recv() => {
                let res = match msg {
                    Some(RelayInput::Data(bytes)) => link.send_data(&bytes).await,
                    Some(RelayInput::Eof) => link.send_eof().await,
                    Some(RelayInput::Resize { cols, rows }) => link.resize(cols, rows).await,
                    None => {
                        info!("Client {} left, closing backend session", client_ip);
                        link.close().await;
                        return;
                    }
                };
                if let Err(e) = res {
                    debug!("Forwarding to backend for {} failed: {}", client_ip, e);
                }
            }
        }
    }

    let status = exit_status.unwrap_or(0);
    info!("Backend closed session for {} (status {})", client_ip, status);
    downstream.exit(status).await;
    link.close().await;
}
