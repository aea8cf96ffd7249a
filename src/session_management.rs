//! Session management core module.
//!
//! Every accepted connection owns one [`auth_gate::AuthGate`]. The gate records the login
//! attempt, silently decides the route and then hands out exactly one session object:
//! a [`decoy_session::DecoySession`] for everyone not on the allow list, or a
//! [`proxy_session::ProxySession`] relaying to the real backend for everyone who is.
//!
//! Sessions are driven by the transport through the [`session::SessionFsm`] interface and
//! write to the client through a [`session::ShellChannel`].

use std::sync::Arc;
use std::time::Duration;

use crate::configuration::AllowList;
use crate::enrichment::GeoEnricher;
use crate::storage::EventLogger;

/// Submodule for credential interception and routing.
pub mod auth_gate;
/// Submodule for the simulated shell.
pub mod decoy_session;
/// Submodule for the relay to the real backend.
pub mod proxy_session;
/// Submodule for the session interface shared by both routes.
pub mod session;


/// Read-only state shared by every connection.
///
/// The logger and the enricher are the only collaborators sessions have in common; both
/// are safe to call concurrently.
pub struct HoneypotContext {
    pub allow_list: AllowList,
    pub logger: EventLogger,
    pub geo: GeoEnricher,
    /// Upper bound on establishing a proxied session with the backend.
    pub connect_timeout: Duration,
}

impl HoneypotContext {
    pub fn new(
        allow_list: AllowList,
        logger: EventLogger,
        geo: GeoEnricher,
        connect_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            allow_list,
            logger,
            geo,
            connect_timeout,
        })
    }
}
