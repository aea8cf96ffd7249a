use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;

use super::routes;
use crate::configuration::types::ReportingConfig;
use crate::error_handling::types::WebError;

/// Read-only HTTP API over the event log.
pub struct WebServer {
    log_path: PathBuf,
    poll_interval: Duration,
}

impl WebServer {
    pub fn new(log_path: &Path, config: &ReportingConfig) -> Self {
        Self {
            log_path: log_path.to_path_buf(),
            poll_interval: Duration::from_millis(config.tail_poll_interval_ms),
        }
    }

    pub fn address(config: &ReportingConfig) -> Result<SocketAddr, WebError> {
        let ip: IpAddr = config.listen_address.parse().map_err(|_| {
            WebError::BindFailed(format!("invalid address {}", config.listen_address))
        })?;
        Ok(SocketAddr::new(ip, config.port))
    }

    /// Serves the API on `addr` until the task is dropped.
    pub async fn start(&self, addr: SocketAddr) -> Result<(), WebError> {
        // Surface an unusable address as an error instead of a panic inside warp.
        std::net::TcpListener::bind(addr)
            .map_err(|e| WebError::BindFailed(format!("{}: {}", addr, e)))?;

        let routes = routes::all(self.log_path.clone(), self.poll_interval);
        info!("Reporting API listening on http://{}", addr);
        warp::serve(routes).run(addr).await;
        Ok(())
    }
}
