use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::configuration::config::Config;
use crate::enrichment::GeoEnricher;
use crate::error_handling::types::*;
use crate::network::network_listener::NetworkListener;
use crate::network::upstream::SshUpstream;
use crate::session_management::HoneypotContext;
use crate::storage::EventLogger;
use crate::web_interface::WebServer;

pub struct Controller {
    pub config: Config,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Creating controller");
        config.validate()?;
        Ok(Self { config })
    }

    /// Builds the state shared by all connections.
    pub fn build_context(&self) -> Result<Arc<HoneypotContext>, ControllerError> {
        let logger = EventLogger::new(&self.config.logging.event_log_path)?;
        let geo = GeoEnricher::new(&self.config.geo);
        if !self.config.geo.enabled {
            info!("Geo enrichment disabled, only local addresses are described");
        }
        Ok(HoneypotContext::new(
            self.config.allow_list.clone(),
            logger,
            geo,
            Duration::from_secs(self.config.backend.connect_timeout_secs),
        ))
    }

    /// Runs the honeypot until Ctrl-C or a fatal listener error.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        info!("Starting controller");
        let context = self.build_context()?;
        let upstream = Arc::new(SshUpstream::new(&self.config.backend));
        info!(
            "Allow-listed logins are forwarded to {}",
            upstream.address()
        );

        if self.config.reporting.enabled {
            let addr = WebServer::address(&self.config.reporting)?;
            let server = WebServer::new(context.logger.path(), &self.config.reporting);
            tokio::spawn(async move {
                if let Err(e) = server.start(addr).await {
                    error!("Reporting API stopped: {}", e);
                }
            });
        }

        let mut listener = NetworkListener::new(Arc::clone(&context), upstream);
        let server_config = self.config.server.clone();

        let result = tokio::select! {
            res = listener.start_listening(&server_config) => res.map_err(ControllerError::from),
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    info!("Interrupt received, shutting down");
                    Ok(())
                }
                Err(e) => Err(ControllerError::InitializationFailed(format!(
                    "cannot listen for Ctrl-C: {}",
                    e
                ))),
            }
        };

        let failures = context.logger.write_failures();
        if failures > 0 {
            warn!("{} event(s) could not be written to the event log", failures);
        }
        info!(
            "{} event(s) written to {}",
            context.logger.appended(),
            context.logger.path().display()
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(matches!(
            Controller::new(config),
            Err(ControllerError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_build_context_creates_log_directory() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("logs").join("honeypot.log");
        let mut config = Config::from_toml("[allow_list]\nadmin = \"pw\"\n").unwrap();
        config.logging.event_log_path = log_path.clone();
        config.geo.enabled = false;

        let controller = Controller::new(config).unwrap();
        let context = controller.build_context().unwrap();

        assert!(log_path.parent().unwrap().is_dir());
        assert!(context.allow_list.matches("admin", "pw"));
        assert_eq!(context.connect_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_unusable_host_key_fails_run() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("host_key");
        std::fs::write(&key_path, "garbage").unwrap();

        let mut config = Config::default();
        config.server.host_key_path = key_path;
        config.logging.event_log_path = dir.path().join("honeypot.log");
        config.geo.enabled = false;

        let mut controller = Controller::new(config).unwrap();
        assert!(matches!(
            controller.run().await,
            Err(ControllerError::NetworkError(NetworkError::HostKeyError(_)))
        ));
    }
}
