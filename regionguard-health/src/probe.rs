//! Service probes for region health endpoints
//!
//! Each probe answers for one [`ServiceKind`]. Errors that describe the
//! service (unreachable, timed out) are turned into unhealthy results by the
//! checker; only [`ProbeError::Misconfigured`] escapes to callers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regionguard_common::{HealthSettings, HealthStatus, Region, ServiceHealth, ServiceKind};
use reqwest::{Client, Url};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("service unreachable: {0}")]
    Unreachable(String),

    #[error("probe misconfigured: {0}")]
    Misconfigured(String),
}

/// Probe trait implemented per service kind
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    fn service(&self) -> ServiceKind;

    /// Whether the region declares an endpoint for this service
    fn applies_to(&self, _region: &Region) -> bool {
        true
    }

    async fn probe(&self, region: &Region) -> Result<ServiceHealth, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
}

fn status_from_body(status: &str) -> HealthStatus {
    match status.to_ascii_lowercase().as_str() {
        "ok" | "healthy" | "up" | "pass" => HealthStatus::Healthy,
        "degraded" | "warning" | "warn" => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

fn map_request_error(error: reqwest::Error, elapsed: Duration) -> ProbeError {
    if error.is_timeout() {
        ProbeError::Timeout(elapsed)
    } else {
        ProbeError::Unreachable(error.to_string())
    }
}

/// `GET {api_base_url}/health`, expecting `{"status": "..."}`
pub struct ApiProbe {
    client: Client,
}

impl ApiProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn health_url(region: &Region) -> Result<Url, ProbeError> {
        let base = region.endpoints.api_base_url.trim_end_matches('/');
        Url::parse(&format!("{}/health", base)).map_err(|e| {
            ProbeError::Misconfigured(format!(
                "invalid api_base_url {:?} for region {}: {}",
                region.endpoints.api_base_url, region.name, e
            ))
        })
    }
}

#[async_trait]
impl ServiceProbe for ApiProbe {
    fn service(&self) -> ServiceKind {
        ServiceKind::Api
    }

    async fn probe(&self, region: &Region) -> Result<ServiceHealth, ProbeError> {
        let url = Self::health_url(region)?;
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_request_error(e, start.elapsed()))?;

        let http_status = response.status();
        if !http_status.is_success() {
            return Ok(ServiceHealth::unhealthy(
                start.elapsed(),
                format!("health endpoint returned HTTP {}", http_status.as_u16()),
            ));
        }

        let health = match response.json::<HealthBody>().await {
            Ok(body) => {
                let status = status_from_body(&body.status);
                let health = ServiceHealth::new(status, start.elapsed());
                if status.is_healthy() {
                    health
                } else {
                    health.with_detail(format!("reported status {:?}", body.status))
                }
            }
            Err(e) => ServiceHealth::unhealthy(start.elapsed(), format!("invalid health body: {}", e)),
        };
        debug!("API probe for {} -> {}", region.name, health.status);
        Ok(health)
    }
}

/// TCP connectivity check against the database endpoint
pub struct DatabaseProbe {
    slow_threshold: Duration,
}

impl DatabaseProbe {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }

    fn address(region: &Region) -> Result<&str, ProbeError> {
        let address = region.endpoints.database_address.as_str();
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(address),
            _ => Err(ProbeError::Misconfigured(format!(
                "database_address {:?} for region {} is not host:port",
                address, region.name
            ))),
        }
    }
}

#[async_trait]
impl ServiceProbe for DatabaseProbe {
    fn service(&self) -> ServiceKind {
        ServiceKind::Database
    }

    async fn probe(&self, region: &Region) -> Result<ServiceHealth, ProbeError> {
        let address = Self::address(region)?;
        let start = Instant::now();
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| ProbeError::Unreachable(format!("{}: {}", address, e)))?;
        drop(stream);

        let elapsed = start.elapsed();
        if elapsed > self.slow_threshold {
            Ok(ServiceHealth::new(HealthStatus::Degraded, elapsed)
                .with_detail(format!("slow connect ({}ms)", elapsed.as_millis())))
        } else {
            Ok(ServiceHealth::new(HealthStatus::Healthy, elapsed))
        }
    }
}

/// `HEAD {cdn_url}`; skipped for regions without a CDN
pub struct CdnProbe {
    client: Client,
}

impl CdnProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceProbe for CdnProbe {
    fn service(&self) -> ServiceKind {
        ServiceKind::Cdn
    }

    fn applies_to(&self, region: &Region) -> bool {
        region.endpoints.cdn_url.is_some()
    }

    async fn probe(&self, region: &Region) -> Result<ServiceHealth, ProbeError> {
        let raw = region.endpoints.cdn_url.as_deref().unwrap_or_default();
        let url = Url::parse(raw).map_err(|e| {
            ProbeError::Misconfigured(format!("invalid cdn_url {:?} for region {}: {}", raw, region.name, e))
        })?;

        let start = Instant::now();
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| map_request_error(e, start.elapsed()))?;

        let code = response.status();
        let status = if code.is_success() || code.is_redirection() {
            HealthStatus::Healthy
        } else if code.is_server_error() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        let health = ServiceHealth::new(status, start.elapsed());
        Ok(if status.is_healthy() {
            health
        } else {
            health.with_detail(format!("CDN returned HTTP {}", code.as_u16()))
        })
    }
}

/// The standard API, database and CDN probes
pub fn default_probes(client: Client, settings: &HealthSettings) -> Vec<Arc<dyn ServiceProbe>> {
    vec![
        Arc::new(ApiProbe::new(client.clone())),
        Arc::new(DatabaseProbe::new(settings.slow_probe())),
        Arc::new(CdnProbe::new(client)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use regionguard_common::{RegionEndpoints, RegionRole};

    fn region_with(endpoints: RegionEndpoints) -> Region {
        Region {
            name: "east".to_string(),
            role: RegionRole::Primary,
            code: "us-east-1".to_string(),
            endpoints,
        }
    }

    #[test]
    fn test_status_from_body() {
        assert_eq!(status_from_body("OK"), HealthStatus::Healthy);
        assert_eq!(status_from_body("degraded"), HealthStatus::Degraded);
        assert_eq!(status_from_body("down"), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_database_address_validation() {
        let good = region_with(RegionEndpoints {
            database_address: "db.internal:5432".to_string(),
            ..Default::default()
        });
        assert_eq!(DatabaseProbe::address(&good).unwrap(), "db.internal:5432");

        let bad = region_with(RegionEndpoints {
            database_address: "db.internal".to_string(),
            ..Default::default()
        });
        assert!(matches!(DatabaseProbe::address(&bad), Err(ProbeError::Misconfigured(_))));
    }

    #[test]
    fn test_api_url_joins_health_path() {
        let region = region_with(RegionEndpoints {
            api_base_url: "https://api.example.com/v1/".to_string(),
            ..Default::default()
        });
        assert_eq!(
            ApiProbe::health_url(&region).unwrap().as_str(),
            "https://api.example.com/v1/health"
        );
    }

    #[test]
    fn test_cdn_probe_skips_regions_without_cdn() {
        let probe = CdnProbe::new(Client::new());
        assert!(!probe.applies_to(&region_with(RegionEndpoints::default())));
    }
}
