use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, info};
use uuid::Uuid;

use super::decoy_session::DecoySession;
use super::proxy_session::{ProxySession, UpstreamConnector};
use super::session::{AuthOutcome, Route, RoutedSession, ShellChannel};
use super::HoneypotContext;
use crate::storage::Event;

/// Credential interception for one connection.
///
/// The gate never refuses anyone. Every password check is logged, compared against the
/// allow list and answered with [`AuthOutcome::Authenticated`]; the comparison only decides
/// which session the connection gets afterwards. The route is fixed by the first password
/// check and each connection gets at most one session.
pub struct AuthGate {
    context: Arc<HoneypotContext>,
    connection_id: Uuid,
    client_ip: IpAddr,
    username: Option<String>,
    password: Option<String>,
    route: Option<Route>,
    session_opened: bool,
}

impl AuthGate {
    pub fn new(context: Arc<HoneypotContext>, client_ip: IpAddr) -> Self {
        Self {
            context,
            connection_id: Uuid::new_v4(),
            client_ip,
            username: None,
            password: None,
            route: None,
            session_opened: false,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn route(&self) -> Option<Route> {
        self.route
    }

    /// Records the username a client announces. Always accepts.
    pub fn begin(&mut self, username: &str) -> bool {
        if self.route.is_none() {
            debug!(
                "[{}] {} announced user {:?}",
                self.connection_id, self.client_ip, username
            );
            self.username = Some(username.to_string());
        }
        true
    }

    /// Logs the attempt and decides the route. The answer is the same for every input.
    pub async fn validate(&mut self, username: &str, password: &str) -> AuthOutcome {
        if let Some(route) = self.route {
            debug!(
                "[{}] Repeated password attempt, route stays {}",
                self.connection_id, route
            );
            return AuthOutcome::Authenticated;
        }

        let geo = self.context.geo.lookup(self.client_ip).await;
        let event = Event::login_attempt(username, password, self.client_ip, geo);
        // Write failures are counted by the logger; authentication goes on.
        let _ = self.context.logger.append(&event).await;

        let route = if self.context.allow_list.matches(username, password) {
            Route::Proxy
        } else {
            Route::Decoy
        };
        info!(
            "[{}] Login {:?} from {}, routed to {}",
            self.connection_id, username, self.client_ip, route
        );

        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self.route = Some(route);
        AuthOutcome::Authenticated
    }

    /// Builds the session for this connection's route.
    ///
    /// Returns `None` before authentication and for any request after the first.
    pub fn session_requested<R, U>(
        &mut self,
        downstream: R,
        upstream: Arc<U>,
    ) -> Option<RoutedSession<R, U>>
    where
        R: ShellChannel + 'static,
        U: UpstreamConnector,
    {
        if self.session_opened {
            debug!("[{}] Refusing a second session", self.connection_id);
            return None;
        }
        let route = self.route?;
        let username = self.username.as_deref()?;

        let session = match route {
            Route::Decoy => RoutedSession::Decoy(DecoySession::new(
                Arc::clone(&self.context),
                username,
                self.client_ip,
            )),
            Route::Proxy => RoutedSession::Proxy(ProxySession::new(
                username,
                self.password.as_deref().unwrap_or_default(),
                self.client_ip,
                upstream,
                downstream,
                self.context.connect_timeout,
            )),
        };
        self.session_opened = true;
        Some(session)
    }
}
