use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, trace};
use russh::server::{Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodKind, MethodSet};

use crate::session_management::auth_gate::AuthGate;
use crate::session_management::proxy_session::UpstreamConnector;
use crate::session_management::session::{
    AuthOutcome, BufferedOutput, PtyRequest, RoutedSession, SessionFsm, ShellChannel,
};
use crate::session_management::HoneypotContext;

/// Writes to a client channel from outside the connection's handler, through the russh
/// session handle. Used by proxy relay tasks.
pub struct HandleChannel {
    handle: Handle,
    id: ChannelId,
}

impl HandleChannel {
    pub fn new(handle: Handle, id: ChannelId) -> Self {
        Self { handle, id }
    }
}

impl ShellChannel for HandleChannel {
    async fn write(&mut self, data: &[u8]) {
        if self
            .handle
            .data(self.id, CryptoVec::from_slice(data))
            .await
            .is_err()
        {
            trace!("Client channel {:?} gone, dropping {} bytes", self.id, data.len());
        }
    }

    async fn exit(&mut self, status: u32) {
        let _ = self.handle.exit_status_request(self.id, status).await;
        let _ = self.handle.eof(self.id).await;
        let _ = self.handle.close(self.id).await;
    }
}

/// Per-connection russh handler.
///
/// Authentication goes through the connection's [`AuthGate`]; once a shell channel is
/// open, every channel callback is forwarded to the routed session and whatever the
/// session wrote is flushed to the client before the callback returns.
pub struct SshConnection<U: UpstreamConnector> {
    gate: AuthGate,
    peer: SocketAddr,
    upstream: Arc<U>,
    channel: Option<Channel<Msg>>,
    session: Option<RoutedSession<HandleChannel, U>>,
}

impl<U: UpstreamConnector> SshConnection<U> {
    pub fn new(context: Arc<HoneypotContext>, upstream: Arc<U>, peer: SocketAddr) -> Self {
        Self {
            gate: AuthGate::new(context, peer.ip()),
            peer,
            upstream,
            channel: None,
            session: None,
        }
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    fn is_active(&self, channel: ChannelId) -> bool {
        self.channel.as_ref().is_some_and(|c| c.id() == channel)
    }

    fn flush(out: BufferedOutput, channel: ChannelId, session: &mut Session) {
        if !out.data.is_empty() {
            let _ = session.data(channel, CryptoVec::from_slice(&out.data));
        }
        if let Some(status) = out.exit_status {
            let _ = session.exit_status_request(channel, status);
            let _ = session.eof(channel);
            let _ = session.close(channel);
        }
    }

    fn password_only() -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(MethodSet::from([MethodKind::Password].as_slice())),
            partial_success: false,
        }
    }
}

impl<U: UpstreamConnector> russh::server::Handler for SshConnection<U> {
    type Error = russh::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        self.gate.begin(user);
        Ok(Self::password_only())
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        self.gate.begin(user);
        match self.gate.validate(user, password).await {
            AuthOutcome::Authenticated => Ok(Auth::Accept),
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.channel.is_some() {
            debug!("[{}] Extra session channel refused", self.gate.connection_id());
            return Ok(false);
        }
        let downstream = HandleChannel::new(session.handle(), channel.id());
        match self
            .gate
            .session_requested(downstream, Arc::clone(&self.upstream))
        {
            Some(routed) => {
                info!(
                    "[{}] {} opened a {} session",
                    self.gate.connection_id(),
                    self.peer,
                    routed.route()
                );
                self.session = Some(routed);
                self.channel = Some(channel);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.is_active(channel) {
            let _ = session.channel_failure(channel);
            return Ok(());
        }
        if let Some(routed) = self.session.as_mut() {
            let term = if term.is_empty() { "xterm" } else { term };
            routed.on_pty(PtyRequest {
                term: term.to_string(),
                cols: col_width,
                rows: row_height,
            });
        }
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.is_active(channel) {
            let _ = session.channel_failure(channel);
            return Ok(());
        }
        let _ = session.channel_success(channel);
        if let Some(routed) = self.session.as_mut() {
            let mut out = BufferedOutput::default();
            routed.on_open(&mut out).await;
            Self::flush(out, channel, session);
        }
        Ok(())
    }

    /// Only interactive shells are offered. A command request gets a failure reply, the
    /// same answer as for a channel that is not ours.
    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(
            "[{}] exec refused: {:?}",
            self.gate.connection_id(),
            String::from_utf8_lossy(data)
        );
        let _ = session.channel_failure(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!("[{}] subsystem {} refused", self.gate.connection_id(), name);
        let _ = session.channel_failure(channel);
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.is_active(channel) {
            return Ok(());
        }
        if let Some(routed) = self.session.as_mut() {
            let mut out = BufferedOutput::default();
            routed.on_data(data, &mut out).await;
            Self::flush(out, channel, session);
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.is_active(channel) {
            return Ok(());
        }
        if let Some(routed) = self.session.as_mut() {
            let mut out = BufferedOutput::default();
            routed.on_eof(&mut out).await;
            Self::flush(out, channel, session);
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.is_active(channel) {
            return Ok(());
        }
        if let Some(mut routed) = self.session.take() {
            routed.on_close();
        }
        self.channel = None;
        debug!("[{}] Session channel closed", self.gate.connection_id());
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.is_active(channel) {
            return Ok(());
        }
        if let Some(routed) = self.session.as_mut() {
            routed.on_resize(col_width, row_height);
        }
        Ok(())
    }
}

impl<U: UpstreamConnector> Drop for SshConnection<U> {
    fn drop(&mut self) {
        if let Some(mut routed) = self.session.take() {
            routed.on_close();
        }
        debug!("[{}] Connection from {} ended", self.gate.connection_id(), self.peer);
    }
}
