use std::fmt;
use std::future::Future;

use super::decoy_session::DecoySession;
use super::proxy_session::{ProxySession, UpstreamConnector};

/// Where an authenticated connection is sent. Decided once, during authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Decoy,
    Proxy,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Decoy => write!(f, "decoy"),
            Route::Proxy => write!(f, "proxy"),
        }
    }
}

/// What the transport is told about a credential check. There is deliberately only one
/// answer: the real decision stays inside the gate as a [`Route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
}

/// Terminal parameters from the client's PTY request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: String::from("xterm"),
            cols: 80,
            rows: 24,
        }
    }
}

/// Client-facing side of a session channel.
pub trait ShellChannel: Send {
    /// Sends bytes to the client, in order.
    fn write(&mut self, data: &[u8]) -> impl Future<Output = ()> + Send;

    /// Reports `status` to the client and closes the channel.
    fn exit(&mut self, status: u32) -> impl Future<Output = ()> + Send;
}

/// Output collected during one transport callback, flushed by the transport afterwards.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BufferedOutput {
    pub data: Vec<u8>,
    pub exit_status: Option<u32>,
}

impl BufferedOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

impl ShellChannel for BufferedOutput {
    async fn write(&mut self, data: &[u8]) {
        if self.exit_status.is_none() {
            self.data.extend_from_slice(data);
        }
    }

    async fn exit(&mut self, status: u32) {
        self.exit_status.get_or_insert(status);
    }
}

/// Per-connection state machine driven by the transport.
pub trait SessionFsm {
    /// The client asked for its shell.
    fn on_open<O: ShellChannel>(&mut self, out: &mut O) -> impl Future<Output = ()> + Send;

    /// Bytes typed by the client.
    fn on_data<O: ShellChannel>(
        &mut self,
        data: &[u8],
        out: &mut O,
    ) -> impl Future<Output = ()> + Send;

    /// The client closed its input.
    fn on_eof<O: ShellChannel>(&mut self, out: &mut O) -> impl Future<Output = ()> + Send;

    /// The channel or the connection is gone. Nothing can be written anymore.
    fn on_close(&mut self);
}

/// The one session a connection gets, whichever route it took.
pub enum RoutedSession<R, U: UpstreamConnector> {
    Decoy(DecoySession),
    Proxy(ProxySession<R, U>),
}

impl<R, U> RoutedSession<R, U>
where
    R: ShellChannel + 'static,
    U: UpstreamConnector,
{
    pub fn route(&self) -> Route {
        match self {
            RoutedSession::Decoy(_) => Route::Decoy,
            RoutedSession::Proxy(_) => Route::Proxy,
        }
    }

    pub fn on_pty(&mut self, pty: PtyRequest) {
        match self {
            RoutedSession::Decoy(s) => s.on_pty(pty),
            RoutedSession::Proxy(s) => s.on_pty(pty),
        }
    }

    pub fn on_resize(&mut self, cols: u32, rows: u32) {
        match self {
            RoutedSession::Decoy(_) => {}
            RoutedSession::Proxy(s) => s.on_resize(cols, rows),
        }
    }
}

impl<R, U> SessionFsm for RoutedSession<R, U>
where
    R: ShellChannel + 'static,
    U: UpstreamConnector,
{
    async fn on_open<O: ShellChannel>(&mut self, out: &mut O) {
        match self {
            RoutedSession::Decoy(s) => s.on_open(out).await,
            RoutedSession::Proxy(s) => s.on_open(out).await,
        }
    }

    async fn on_data<O: ShellChannel>(&mut self, data: &[u8], out: &mut O) {
        match self {
            RoutedSession::Decoy(s) => s.on_data(data, out).await,
            RoutedSession::Proxy(s) => s.on_data(data, out).await,
        }
    }

    async fn on_eof<O: ShellChannel>(&mut self, out: &mut O) {
        match self {
            RoutedSession::Decoy(s) => s.on_eof(out).await,
            RoutedSession::Proxy(s) => s.on_eof(out).await,
        }
    }

    fn on_close(&mut self) {
        match self {
            RoutedSession::Decoy(s) => s.on_close(),
            RoutedSession::Proxy(s) => s.on_close(),
        }
    }
}
