//! Best-effort IP geolocation.
//!
//! Lookups go to an ip-api.com compatible JSON endpoint. Loopback and private addresses
//! never leave the host. Every failure (timeout, transport, non-success status, bad JSON)
//! collapses into an empty [`GeoInfo`]. There is no cache and no retry: each call pays for
//! its own lookup.

use std::net::IpAddr;
use std::time::Duration;

use log::{debug, trace};
use serde::Deserialize;

use crate::configuration::types::GeoConfig;
use crate::error_handling::types::GeoError;
use crate::storage::types::GeoInfo;

const LOOKUP_FIELDS: &str = "status,country,city,org,lat,lon";

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    country: Option<String>,
    city: Option<String>,
    org: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

pub struct GeoEnricher {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    enabled: bool,
}

impl GeoEnricher {
    pub fn new(config: &GeoConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        Self::with_timeout(config.endpoint.clone(), timeout, config.enabled)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration, enabled: bool) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout,
            enabled,
        }
    }

    /// An enricher that only ever answers for local addresses.
    pub fn disabled() -> Self {
        Self::with_timeout("http://127.0.0.1", Duration::from_secs(1), false)
    }

    /// Looks up `ip`. Never fails and never takes longer than the configured timeout.
    pub async fn lookup(&self, ip: IpAddr) -> GeoInfo {
        if is_local(&ip) {
            trace!("{} is local, skipping geo lookup", ip);
            return GeoInfo::local();
        }
        if !self.enabled {
            return GeoInfo::default();
        }

        match tokio::time::timeout(self.timeout, self.fetch(ip)).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                debug!("Geo lookup for {} failed: {}", ip, e);
                GeoInfo::default()
            }
            Err(_) => {
                debug!("Geo lookup for {} failed: {}", ip, GeoError::Timeout);
                GeoInfo::default()
            }
        }
    }

    async fn fetch(&self, ip: IpAddr) -> Result<GeoInfo, GeoError> {
        let url = format!("{}/{}?fields={}", self.endpoint, ip, LOOKUP_FIELDS);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeoError::Timeout
                } else {
                    GeoError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::BadStatus(format!("HTTP {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GeoError::Transport(e.to_string()))?;
        let parsed: LookupResponse =
            serde_json::from_str(&body).map_err(|e| GeoError::Malformed(e.to_string()))?;

        if parsed.status != "success" {
            return Err(GeoError::BadStatus(
                parsed.message.unwrap_or(parsed.status),
            ));
        }

        Ok(GeoInfo {
            country: parsed.country,
            city: parsed.city,
            org: parsed.org,
            lat: parsed.lat,
            lon: parsed.lon,
        })
    }
}

/// Loopback, private, link-local and unspecified addresses, including IPv4-mapped IPv6.
pub fn is_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_local(&IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}
